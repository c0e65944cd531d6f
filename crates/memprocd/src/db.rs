//! Database bootstrap: connection pool sizing and the startup
//! readiness probe (spec.md §4.1, §5).

use std::time::Duration;

use chrono::Datelike;
use sqlx::postgres::{PgPool, PgPoolOptions};

use memproc_core::scheduler::wait_for_db_ready;
use memproc_core::MemprocError;

/// Builds the pool with the reference sizing from spec.md §5: min 5,
/// max 50, idle connections recycled after 300s.
pub async fn connect_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .min_connections(5)
        .max_connections(50)
        .idle_timeout(Duration::from_secs(300))
        .acquire_timeout(Duration::from_secs(30))
        .connect(database_url)
        .await
}

/// Blocks until the pool can run a trivial query, up to `max_attempts`
/// tries `interval` apart (spec.md §4.1: 30 attempts, 2s).
pub async fn wait_until_ready(pool: &PgPool, max_attempts: u32, interval: Duration) -> Result<(), MemprocError> {
    wait_for_db_ready(
        || async {
            sqlx::query("SELECT 1").execute(pool).await.map(|_| ()).map_err(|e| e.to_string())
        },
        max_attempts,
        interval,
    )
    .await
    .map_err(MemprocError::TransientStore)
}

/// Creates history-table partitions for the current and next calendar
/// year (spec.md §6: "partitions for the current and next calendar year
/// are created at startup").
pub async fn ensure_history_partitions(pool: &PgPool, table: &str) -> Result<(), sqlx::Error> {
    let now = chrono::Utc::now();
    for year_offset in 0..=1 {
        let year = now.format("%Y").to_string().parse::<i32>().unwrap_or(now.year()) + year_offset;
        for month in 1..=12u32 {
            let partition = format!("{table}_{year}_{month:02}");
            let start = format!("{year}-{month:02}-01");
            let next_month = if month == 12 { 1 } else { month + 1 };
            let next_year = if month == 12 { year + 1 } else { year };
            let end = format!("{next_year}-{next_month:02}-01");
            let query = format!(
                "CREATE TABLE IF NOT EXISTS {partition} PARTITION OF {table}
                 FOR VALUES FROM ('{start}') TO ('{end}')",
            );
            sqlx::query(&query).execute(pool).await?;
        }
    }
    Ok(())
}
