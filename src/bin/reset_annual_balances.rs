//! Resets every active employee's annual-leave balance for the current
//! financial year to the leave type's default allotment.
//!
//! Dry run by default; pass `--run` to write the changes.

use anyhow::{Context, Result, bail};
use clap::Parser;
use sqlx::mysql::MySqlPoolOptions;

use leave_desk::utils::financial_year::{
    AnnualResetPlan, annual_reset_plan, apply_annual_reset, current_financial_year,
};

const PREVIEW_ROWS: usize = 20;

#[derive(Parser)]
#[command(name = "reset_annual_balances")]
#[command(version, about = "Reset annual leave balances for the current financial year")]
struct Cli {
    /// Apply the reset; without it only the preview is printed
    #[arg(long)]
    run: bool,

    #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
    database_url: String,

    /// First month (1-12) of the financial year
    #[arg(long, env = "FY_START_MONTH", default_value_t = 4, value_parser = clap::value_parser!(u32).range(1..=12))]
    fy_start_month: u32,
}

fn print_preview(plan: &AnnualResetPlan) {
    let names: Vec<&str> = plan.leave_types.iter().map(|t| t.name.as_str()).collect();
    println!("Financial year: {}-{}", plan.year, plan.year + 1);
    println!("Annual leave types: {}", names.join(", "));
    println!("Rows to reset: {}", plan.entries.len());
    println!();

    for entry in plan.entries.iter().take(PREVIEW_ROWS) {
        let current = match &entry.existing {
            Some(b) => format!(
                "total {:>5.1} used {:>5.1} remaining {:>5.1}",
                b.total_days, b.used_days, b.remaining_days
            ),
            None => "no balance row".to_string(),
        };
        println!(
            "{:<40} {:<20} {} -> total {:.1}",
            entry.employee, entry.leave_type, current, entry.desired_total
        );
    }

    if plan.entries.len() > PREVIEW_ROWS {
        println!("... and {} more", plan.entries.len() - PREVIEW_ROWS);
    }
}

#[actix_web::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let pool = MySqlPoolOptions::new()
        .max_connections(2)
        .connect(&cli.database_url)
        .await
        .context("Failed to connect to database")?;

    let year = current_financial_year(cli.fy_start_month);
    let plan = annual_reset_plan(&pool, year)
        .await
        .context("Failed to build the reset preview")?;

    if plan.leave_types.is_empty() {
        bail!("No active annual leave type found; nothing to reset");
    }

    print_preview(&plan);

    if !cli.run {
        println!();
        println!("Dry run only. Re-run with --run to apply.");
        return Ok(());
    }

    log::info!("Applying annual leave reset for FY {year}");
    let (updated, created) = apply_annual_reset(&pool, &plan)
        .await
        .context("Reset failed; no balances were changed")?;

    println!();
    println!("Updated {updated} balance rows, created {created}.");
    log::info!("Annual leave reset complete: {updated} updated, {created} created");

    pool.close().await;
    Ok(())
}
