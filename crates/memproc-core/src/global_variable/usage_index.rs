//! Advisory usage-index cache (spec.md §4.17).
//!
//! `FindUsages` is expensive (scans every block table), so results are
//! cached in Redis under a short TTL and invalidated on rename. A cache
//! miss or a failed invalidation never blocks the rename transaction
//! itself — the index is a read accelerator, not a source of truth.

use redis::AsyncCommands;
use redis::aio::ConnectionManager;

use crate::error::MemprocError;

use super::UsageRef;

const TTL_SECONDS: u64 = 300;

fn cache_key(name: &str) -> String {
    crate::value_store::global_variable_usage_index_key(name)
}

pub struct UsageIndex {
    conn: ConnectionManager,
}

impl UsageIndex {
    pub async fn connect(url: &str) -> Result<Self, MemprocError> {
        let client = redis::Client::open(url)
            .map_err(|e| MemprocError::TransientStore(format!("invalid redis url: {e}")))?;
        let conn = client.get_tokio_connection_manager().await?;
        Ok(Self { conn })
    }

    pub async fn get(&self, name: &str) -> Result<Option<Vec<UsageRef>>, MemprocError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(cache_key(name)).await?;
        Ok(raw.and_then(|s| serde_json::from_str::<Vec<UsageRef>>(&s).ok()))
    }

    pub async fn put(&self, name: &str, usages: &[UsageRef]) -> Result<(), MemprocError> {
        let mut conn = self.conn.clone();
        let payload = serde_json::to_string(usages)
            .map_err(|e| MemprocError::TransientStore(format!("serialize usage index: {e}")))?;
        let _: () = conn.set_ex(cache_key(name), payload, TTL_SECONDS).await?;
        Ok(())
    }

    /// Best-effort invalidation. Callers must not treat a failure here as
    /// a rename failure: the entry simply expires naturally within
    /// `TTL_SECONDS` and the next lookup recomputes it.
    pub async fn invalidate(&self, name: &str) -> Result<(), MemprocError> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(cache_key(name)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_key_matches_value_store_convention() {
        assert_eq!(cache_key("Setpoint1"), "UsageIndex:GlobalVariable:Setpoint1");
    }
}
