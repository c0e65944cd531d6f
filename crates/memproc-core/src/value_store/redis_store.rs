//! Redis-backed Value Store Gateway.
//!
//! Grounded on the `redis` crate's `ConnectionManager` (the async,
//! auto-reconnecting handle the ecosystem reaches for whenever a repo pairs
//! `tokio` with Redis — see the `redis`/`tokio-comp` pairing in the pack's
//! `other_examples` manifests). Raw items carry an optional bounded-duration
//! override on top of the last permanent write, so a timed write can expire
//! back to the prior value without a background sweep.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::MemprocError;

use super::{TuningState, ValueEntry, ValueStoreGateway, final_key, global_variable_key, pid_tuning_state_key, raw_key};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawRecord {
    base_value: String,
    base_time: i64,
    /// Active timed override, if any: `(value, written_at, expires_at)`.
    r#override: Option<(String, i64, i64)>,
}

impl RawRecord {
    fn current(&self, now: i64) -> ValueEntry {
        if let Some((value, written_at, expires_at)) = &self.r#override {
            if now < *expires_at {
                return ValueEntry::new(value.clone(), *written_at);
            }
        }
        ValueEntry::new(self.base_value.clone(), self.base_time)
    }
}

pub struct RedisValueStore {
    conn: ConnectionManager,
}

impl RedisValueStore {
    pub async fn connect(url: &str) -> Result<Self, MemprocError> {
        let client = redis::Client::open(url)
            .map_err(|e| MemprocError::TransientStore(format!("invalid redis url: {e}")))?;
        let conn = client.get_tokio_connection_manager().await?;
        Ok(Self { conn })
    }

    async fn mget_entries(&self, keys: &[String]) -> Result<Vec<Option<String>>, MemprocError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();
        if keys.len() == 1 {
            let v: Option<String> = conn.get(&keys[0]).await?;
            return Ok(vec![v]);
        }
        let values: Vec<Option<String>> = conn.mget(keys).await?;
        Ok(values)
    }
}

#[async_trait]
impl ValueStoreGateway for RedisValueStore {
    async fn get_final(&self, ids: &[Uuid]) -> Result<HashMap<Uuid, ValueEntry>, MemprocError> {
        let keys: Vec<String> = ids.iter().map(|id| final_key(*id)).collect();
        let raw_values = self.mget_entries(&keys).await?;
        let mut out = HashMap::new();
        for (id, raw) in ids.iter().zip(raw_values) {
            if let Some(raw) = raw
                && let Ok(entry) = serde_json::from_str::<ValueEntry>(&raw)
            {
                out.insert(*id, entry);
            }
        }
        Ok(out)
    }

    async fn get_raw(&self, ids: &[Uuid]) -> Result<HashMap<Uuid, ValueEntry>, MemprocError> {
        let keys: Vec<String> = ids.iter().map(|id| raw_key(*id)).collect();
        let raw_values = self.mget_entries(&keys).await?;
        let now = Utc::now().timestamp();
        let mut out = HashMap::new();
        for (id, raw) in ids.iter().zip(raw_values) {
            if let Some(raw) = raw
                && let Ok(record) = serde_json::from_str::<RawRecord>(&raw)
            {
                out.insert(*id, record.current(now));
            }
        }
        Ok(out)
    }

    async fn get_global_variable(&self, name: &str) -> Result<Option<ValueEntry>, MemprocError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(global_variable_key(name)).await?;
        Ok(raw.and_then(|s| serde_json::from_str(&s).ok()))
    }

    async fn write_or_add(
        &self,
        id: Uuid,
        value: &str,
        time: i64,
        duration: Option<i64>,
    ) -> Result<bool, MemprocError> {
        let mut conn = self.conn.clone();
        let key = raw_key(id);
        let existing: Option<String> = conn.get(&key).await?;
        let mut record = existing
            .and_then(|s| serde_json::from_str::<RawRecord>(&s).ok())
            .unwrap_or(RawRecord {
                base_value: value.to_string(),
                base_time: time,
                r#override: None,
            });

        match duration {
            Some(d) if d > 0 => {
                record.r#override = Some((value.to_string(), time, time + d));
            }
            _ => {
                record.base_value = value.to_string();
                record.base_time = time;
                record.r#override = None;
            }
        }

        let payload = serde_json::to_string(&record)
            .map_err(|e| MemprocError::TransientStore(format!("serialize raw record: {e}")))?;
        let _: () = conn.set(&key, payload).await?;
        Ok(true)
    }

    async fn write_global_variable(&self, name: &str, value: &str, time: i64) -> Result<bool, MemprocError> {
        let mut conn = self.conn.clone();
        let entry = ValueEntry::new(value, time);
        let payload = serde_json::to_string(&entry)
            .map_err(|e| MemprocError::TransientStore(format!("serialize global variable: {e}")))?;
        let _: () = conn.set(global_variable_key(name), payload).await?;
        Ok(true)
    }

    async fn set_tuning_state(&self, pid_memory_id: Uuid, state: &TuningState) -> Result<(), MemprocError> {
        let mut conn = self.conn.clone();
        let payload = serde_json::to_string(state)
            .map_err(|e| MemprocError::TransientStore(format!("serialize tuning state: {e}")))?;
        let _: () = conn.set(pid_tuning_state_key(pid_memory_id), payload).await?;
        Ok(())
    }

    async fn get_tuning_state(&self, pid_memory_id: Uuid) -> Result<Option<TuningState>, MemprocError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(pid_tuning_state_key(pid_memory_id)).await?;
        Ok(raw.and_then(|s| serde_json::from_str(&s).ok()))
    }

    async fn delete_tuning_state(&self, pid_memory_id: Uuid) -> Result<(), MemprocError> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(pid_tuning_state_key(pid_memory_id)).await?;
        Ok(())
    }
}
