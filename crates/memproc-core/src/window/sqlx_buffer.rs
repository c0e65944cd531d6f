//! Postgres-backed window buffer.
//!
//! Each windowed block kind owns a child `samples` table keyed by parent
//! id with `(timestamp, value)` columns and cascade delete (spec.md §6).
//! Query strings are built per-call the way the teacher's
//! `pg_collector::queries` module builds version-aware SQL, since the
//! table name varies per block kind and `sqlx::query!`'s compile-time
//! check has no database to check against in this environment.

use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::error::MemprocError;

use super::{WindowBuffer, WindowSample};

/// A window buffer bound to one child samples table, e.g.
/// `rate_of_change_samples` or `statistical_samples`.
pub struct SqlxWindowBuffer {
    pool: PgPool,
    table: &'static str,
}

impl SqlxWindowBuffer {
    pub fn new(pool: PgPool, table: &'static str) -> Self {
        Self { pool, table }
    }
}

#[async_trait]
impl WindowBuffer for SqlxWindowBuffer {
    async fn push_sample(&self, block_id: Uuid, sample: WindowSample) -> Result<(), MemprocError> {
        let query = format!(
            "INSERT INTO {} (block_id, \"timestamp\", value) VALUES ($1, $2, $3)",
            self.table
        );
        sqlx::query(&query)
            .bind(block_id)
            .bind(sample.timestamp)
            .bind(sample.value)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn recent(&self, block_id: Uuid, limit: usize) -> Result<Vec<WindowSample>, MemprocError> {
        let query = format!(
            "SELECT \"timestamp\", value FROM (
                 SELECT \"timestamp\", value FROM {} WHERE block_id = $1
                 ORDER BY \"timestamp\" DESC LIMIT $2
             ) AS recent ORDER BY \"timestamp\" ASC",
            self.table
        );
        let rows = sqlx::query(&query)
            .bind(block_id)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .map(|row| WindowSample {
                timestamp: row.get("timestamp"),
                value: row.get("value"),
            })
            .collect())
    }

    async fn count(&self, block_id: Uuid) -> Result<usize, MemprocError> {
        let query = format!("SELECT COUNT(*) AS n FROM {} WHERE block_id = $1", self.table);
        let row = sqlx::query(&query).bind(block_id).fetch_one(&self.pool).await?;
        let n: i64 = row.get("n");
        Ok(n as usize)
    }

    async fn clear(&self, block_id: Uuid) -> Result<(), MemprocError> {
        let query = format!("DELETE FROM {} WHERE block_id = $1", self.table);
        sqlx::query(&query).bind(block_id).execute(&self.pool).await?;
        Ok(())
    }

    async fn prune(&self, block_id: Uuid, retain: usize) -> Result<(), MemprocError> {
        let query = format!(
            "DELETE FROM {0} WHERE block_id = $1 AND \"timestamp\" NOT IN (
                 SELECT \"timestamp\" FROM {0} WHERE block_id = $1
                 ORDER BY \"timestamp\" DESC LIMIT $2
             )",
            self.table
        );
        sqlx::query(&query)
            .bind(block_id)
            .bind(retain as i64)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn prune_all(&self, retain_per_block: &HashMap<Uuid, usize>) -> Result<(), MemprocError> {
        for (&block_id, &retain) in retain_per_block {
            self.prune(block_id, retain).await?;
        }
        Ok(())
    }
}
