//! Financial-year arithmetic and the per-employee balance ledger.
//!
//! A financial year is labelled by the calendar year it starts in. With the
//! default April start, 2026-02-10 falls in FY 2025 (2025-04-01..=2026-03-31).

use std::collections::HashMap;

use chrono::{Datelike, NaiveDate, Utc};
use serde::Serialize;
use sqlx::{MySql, MySqlConnection, MySqlPool};

use crate::model::leave_balance::{BALANCE_COLUMNS, LeaveBalance};
use crate::model::leave_type::{ANNUAL_MAX_CARRY_OVER, LeaveType};

pub fn financial_year_for(date: NaiveDate, start_month: u32) -> i32 {
    if date.month() < start_month {
        date.year() - 1
    } else {
        date.year()
    }
}

pub fn current_financial_year(start_month: u32) -> i32 {
    financial_year_for(Utc::now().date_naive(), start_month)
}

/// Inclusive first and last day of a financial year.
pub fn financial_year_bounds(year: i32, start_month: u32) -> Option<(NaiveDate, NaiveDate)> {
    let start = NaiveDate::from_ymd_opt(year, start_month, 1)?;
    let next_start = NaiveDate::from_ymd_opt(year + 1, start_month, 1)?;
    Some((start, next_start.pred_opt()?))
}

pub fn remaining(total: f64, used: f64, carried_over: f64) -> f64 {
    total - used + carried_over
}

/// Days moved into the next year: whatever is left, capped at the allowance.
pub fn carry_over(previous_remaining: f64, max_carry_over: f64) -> f64 {
    previous_remaining.max(0.0).min(max_carry_over.max(0.0))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedBalance {
    pub user_id: u64,
    pub leave_type_id: u64,
    pub year: i32,
    pub total_days: f64,
    pub carried_over_days: f64,
    pub max_carry_over: f64,
}

/// New-year balance for one employee and leave type, given last year's row.
pub fn plan_rollover(
    user_id: u64,
    leave_type: &LeaveType,
    new_year: i32,
    previous: Option<&LeaveBalance>,
) -> PlannedBalance {
    let carried = match previous {
        Some(prev) if leave_type.is_annual() => carry_over(prev.remaining_days, prev.max_carry_over),
        _ => 0.0,
    };
    PlannedBalance {
        user_id,
        leave_type_id: leave_type.id,
        year: new_year,
        total_days: leave_type.default_days,
        carried_over_days: carried,
        max_carry_over: leave_type.max_carry_over(),
    }
}

pub async fn find_balance<'c, E>(
    executor: E,
    user_id: u64,
    leave_type_id: u64,
    year: i32,
) -> Result<Option<LeaveBalance>, sqlx::Error>
where
    E: sqlx::Executor<'c, Database = MySql>,
{
    sqlx::query_as::<_, LeaveBalance>(&format!(
        "SELECT {BALANCE_COLUMNS} FROM leave_balances WHERE user_id = ? AND leave_type_id = ? AND year = ?"
    ))
    .bind(user_id)
    .bind(leave_type_id)
    .bind(year)
    .fetch_optional(executor)
    .await
}

/// Creates the missing balance rows for every active leave type. Rows that
/// already exist are left untouched.
pub async fn initialize_employee_balances<'c, E>(
    executor: E,
    user_id: u64,
    year: i32,
) -> Result<u64, sqlx::Error>
where
    E: sqlx::Executor<'c, Database = MySql>,
{
    let result = sqlx::query(
        r#"
        INSERT INTO leave_balances
            (user_id, leave_type_id, year, total_days, used_days, remaining_days,
             carried_over_days, max_carry_over)
        SELECT ?, lt.id, ?, lt.default_days, 0, lt.default_days, 0,
               CASE WHEN LOWER(lt.name) LIKE '%annual%' THEN ? ELSE 0 END
        FROM leave_types lt
        WHERE lt.is_active = TRUE
        ON DUPLICATE KEY UPDATE id = id
        "#,
    )
    .bind(user_id)
    .bind(year)
    .bind(ANNUAL_MAX_CARRY_OVER)
    .execute(executor)
    .await?;

    Ok(result.rows_affected())
}

/// Looks the balance up, initializing the year's balances when it is missing.
pub async fn ensure_balance(
    conn: &mut MySqlConnection,
    user_id: u64,
    leave_type_id: u64,
    year: i32,
) -> Result<Option<LeaveBalance>, sqlx::Error> {
    if let Some(balance) = find_balance(&mut *conn, user_id, leave_type_id, year).await? {
        return Ok(Some(balance));
    }

    tracing::info!(user_id, year, "No leave balance found, initializing balances");
    initialize_employee_balances(&mut *conn, user_id, year).await?;
    find_balance(&mut *conn, user_id, leave_type_id, year).await
}

/// Books approved days against a balance, keeping remaining consistent.
pub async fn consume_balance(
    conn: &mut MySqlConnection,
    balance_id: u64,
    days: f64,
) -> Result<(), sqlx::Error> {
    // single-table UPDATE assigns left to right, so remaining sees the new used_days
    sqlx::query(
        r#"
        UPDATE leave_balances
        SET used_days = used_days + ?,
            remaining_days = total_days - used_days + carried_over_days
        WHERE id = ?
        "#,
    )
    .bind(days)
    .bind(balance_id)
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn active_leave_types<'c, E>(executor: E) -> Result<Vec<LeaveType>, sqlx::Error>
where
    E: sqlx::Executor<'c, Database = MySql>,
{
    sqlx::query_as::<_, LeaveType>(
        "SELECT id, name, description, default_days, color, is_active FROM leave_types WHERE is_active = TRUE ORDER BY id",
    )
    .fetch_all(executor)
    .await
}

/// Moves every active employee into `new_year`, carrying over unused annual
/// leave. Everything happens in one transaction. Returns the number of
/// employees processed.
pub async fn rollover(pool: &MySqlPool, new_year: i32) -> Result<u64, sqlx::Error> {
    let mut tx = pool.begin().await?;

    let leave_types = active_leave_types(&mut *tx).await?;
    let user_ids: Vec<u64> = sqlx::query_scalar::<_, u64>("SELECT id FROM users WHERE is_active = TRUE ORDER BY id")
        .fetch_all(&mut *tx)
        .await?;

    let previous: HashMap<(u64, u64), LeaveBalance> = sqlx::query_as::<_, LeaveBalance>(&format!(
        "SELECT {BALANCE_COLUMNS} FROM leave_balances WHERE year = ?"
    ))
    .bind(new_year - 1)
    .fetch_all(&mut *tx)
    .await?
    .into_iter()
    .map(|b| ((b.user_id, b.leave_type_id), b))
    .collect();

    for &user_id in &user_ids {
        for leave_type in &leave_types {
            let plan = plan_rollover(
                user_id,
                leave_type,
                new_year,
                previous.get(&(user_id, leave_type.id)),
            );
            upsert_planned_balance(&mut *tx, &plan).await?;
        }
    }

    tx.commit().await?;

    tracing::info!(new_year, processed = user_ids.len(), "Financial year rollover complete");
    Ok(user_ids.len() as u64)
}

async fn upsert_planned_balance(conn: &mut MySqlConnection, plan: &PlannedBalance) -> Result<(), sqlx::Error> {
    // existing rows keep their used days; remaining is recomputed after total/carried change
    sqlx::query(
        r#"
        INSERT INTO leave_balances
            (user_id, leave_type_id, year, total_days, used_days, remaining_days,
             carried_over_days, max_carry_over)
        VALUES (?, ?, ?, ?, 0, ?, ?, ?)
        ON DUPLICATE KEY UPDATE
            total_days = VALUES(total_days),
            carried_over_days = VALUES(carried_over_days),
            max_carry_over = VALUES(max_carry_over),
            remaining_days = total_days - used_days + carried_over_days
        "#,
    )
    .bind(plan.user_id)
    .bind(plan.leave_type_id)
    .bind(plan.year)
    .bind(plan.total_days)
    .bind(remaining(plan.total_days, 0.0, plan.carried_over_days))
    .bind(plan.carried_over_days)
    .bind(plan.max_carry_over)
    .execute(conn)
    .await?;
    Ok(())
}

/// One row of the annual-leave reset preview.
#[derive(Debug, Clone, Serialize)]
pub struct ResetEntry {
    pub user_id: u64,
    pub employee: String,
    pub leave_type_id: u64,
    pub leave_type: String,
    pub existing: Option<LeaveBalance>,
    pub desired_total: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnnualResetPlan {
    pub year: i32,
    pub leave_types: Vec<LeaveType>,
    pub entries: Vec<ResetEntry>,
}

#[derive(sqlx::FromRow)]
struct EmployeeName {
    id: u64,
    employee_code: Option<String>,
    first_name: String,
    last_name: String,
}

/// Preview of resetting every active employee's annual leave for `year` to
/// the leave type's default allotment.
pub async fn annual_reset_plan(pool: &MySqlPool, year: i32) -> Result<AnnualResetPlan, sqlx::Error> {
    let leave_types: Vec<LeaveType> = active_leave_types(pool)
        .await?
        .into_iter()
        .filter(LeaveType::is_annual)
        .collect();

    let employees = sqlx::query_as::<_, EmployeeName>(
        "SELECT id, employee_code, first_name, last_name FROM users WHERE is_active = TRUE ORDER BY id",
    )
    .fetch_all(pool)
    .await?;

    let existing: HashMap<(u64, u64), LeaveBalance> = sqlx::query_as::<_, LeaveBalance>(&format!(
        "SELECT {BALANCE_COLUMNS} FROM leave_balances WHERE year = ?"
    ))
    .bind(year)
    .fetch_all(pool)
    .await?
    .into_iter()
    .map(|b| ((b.user_id, b.leave_type_id), b))
    .collect();

    let mut entries = Vec::with_capacity(employees.len() * leave_types.len());
    for emp in &employees {
        for lt in &leave_types {
            entries.push(ResetEntry {
                user_id: emp.id,
                employee: format!(
                    "{} {} {}",
                    emp.employee_code.as_deref().unwrap_or("-"),
                    emp.first_name,
                    emp.last_name
                ),
                leave_type_id: lt.id,
                leave_type: lt.name.clone(),
                existing: existing.get(&(emp.id, lt.id)).cloned(),
                desired_total: lt.default_days,
            });
        }
    }

    Ok(AnnualResetPlan {
        year,
        leave_types,
        entries,
    })
}

/// Applies a reset plan in one transaction; returns (updated, created).
pub async fn apply_annual_reset(pool: &MySqlPool, plan: &AnnualResetPlan) -> Result<(u64, u64), sqlx::Error> {
    let mut tx = pool.begin().await?;
    let mut updated = 0;
    let mut created = 0;

    for entry in &plan.entries {
        match &entry.existing {
            Some(existing) => {
                sqlx::query(
                    r#"
                    UPDATE leave_balances
                    SET total_days = ?, used_days = 0, remaining_days = ?,
                        carried_over_days = 0, max_carry_over = ?
                    WHERE id = ?
                    "#,
                )
                .bind(entry.desired_total)
                .bind(entry.desired_total)
                .bind(ANNUAL_MAX_CARRY_OVER)
                .bind(existing.id)
                .execute(&mut *tx)
                .await?;
                updated += 1;
            }
            None => {
                sqlx::query(
                    r#"
                    INSERT INTO leave_balances
                        (user_id, leave_type_id, year, total_days, used_days, remaining_days,
                         carried_over_days, max_carry_over, is_active)
                    VALUES (?, ?, ?, ?, 0, ?, 0, ?, TRUE)
                    "#,
                )
                .bind(entry.user_id)
                .bind(entry.leave_type_id)
                .bind(plan.year)
                .bind(entry.desired_total)
                .bind(entry.desired_total)
                .bind(ANNUAL_MAX_CARRY_OVER)
                .execute(&mut *tx)
                .await?;
                created += 1;
            }
        }
    }

    tx.commit().await?;
    Ok((updated, created))
}
