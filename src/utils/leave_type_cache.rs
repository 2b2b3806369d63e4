use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use once_cell::sync::Lazy;
use sqlx::MySqlPool;

use crate::model::leave_type::{DEFAULT_LEAVE_TYPES, LeaveType};

/// The whole leave type catalog under a single key.
static LEAVE_TYPES: Lazy<Cache<(), Arc<Vec<LeaveType>>>> = Lazy::new(|| {
    Cache::builder()
        .max_capacity(1)
        .time_to_live(Duration::from_secs(300))
        .build()
});

async fn fetch_all(pool: &MySqlPool) -> Result<Vec<LeaveType>, sqlx::Error> {
    sqlx::query_as::<_, LeaveType>(
        "SELECT id, name, description, default_days, color, is_active FROM leave_types ORDER BY id",
    )
    .fetch_all(pool)
    .await
}

/// Inserts the default catalog; names that already exist are skipped.
pub async fn seed_default_leave_types(pool: &MySqlPool) -> Result<u64, sqlx::Error> {
    let mut tx = pool.begin().await?;
    let mut inserted = 0;

    for (name, description, default_days) in DEFAULT_LEAVE_TYPES {
        let result = sqlx::query(
            "INSERT IGNORE INTO leave_types (name, description, default_days) VALUES (?, ?, ?)",
        )
        .bind(name)
        .bind(description)
        .bind(default_days)
        .execute(&mut *tx)
        .await?;
        inserted += result.rows_affected();
    }

    tx.commit().await?;
    Ok(inserted)
}

/// Every leave type, seeding the defaults when the table is empty.
pub async fn leave_types(pool: &MySqlPool) -> Result<Arc<Vec<LeaveType>>, sqlx::Error> {
    if let Some(cached) = LEAVE_TYPES.get(&()).await {
        return Ok(cached);
    }

    let mut types = fetch_all(pool).await?;
    if types.is_empty() {
        let seeded = seed_default_leave_types(pool).await?;
        tracing::info!(seeded, "No leave types found, created the default catalog");
        types = fetch_all(pool).await?;
    }

    let types = Arc::new(types);
    LEAVE_TYPES.insert((), types.clone()).await;
    Ok(types)
}

pub async fn find_leave_type(pool: &MySqlPool, id: u64) -> Result<Option<LeaveType>, sqlx::Error> {
    Ok(leave_types(pool).await?.iter().find(|t| t.id == id).cloned())
}

/// Loads (and if needed seeds) the catalog at startup.
pub async fn warmup_leave_types(pool: &MySqlPool) -> anyhow::Result<()> {
    let types = leave_types(pool).await?;
    log::info!("Leave type cache warmup complete: {} types", types.len());
    Ok(())
}
