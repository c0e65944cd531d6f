//! Value Store Gateway (spec.md §4.2).
//!
//! Batched get/set against the fast KV store; duration-bounded writes;
//! history append. The gateway is the only component that speaks the
//! wire key formats in spec.md §6 (`FinalItem:<uuid>`, `RawItem:<uuid>`,
//! `PIDTuningState:<uuid>`, ...).

#[cfg(feature = "redis")]
pub mod redis_store;

#[cfg(feature = "mock")]
pub mod mock;

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::MemprocError;

/// The stored shape of a Raw/Final item: `{value, time}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValueEntry {
    pub value: String,
    pub time: i64,
}

impl ValueEntry {
    pub fn new(value: impl Into<String>, time: i64) -> Self {
        Self {
            value: value.into(),
            time,
        }
    }

    /// Parses the stored value as `f64`. Used by analog-facing blocks.
    pub fn as_f64(&self) -> Result<f64, MemprocError> {
        self.value
            .trim()
            .parse::<f64>()
            .map_err(|e| MemprocError::Parse(format!("'{}' is not numeric: {e}", self.value)))
    }

    /// Parses the stored value as a boolean per spec.md §6.
    pub fn as_bool(&self) -> Result<bool, MemprocError> {
        crate::boolean_parse::parse_bool(&self.value)
    }
}

/// Transient PID auto-tune session state held in the KV store
/// (spec.md §4.16).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TuningState {
    pub setpoint: f64,
    pub relay_high: f64,
    pub relay_low: f64,
    pub hysteresis: f64,
    pub relay_active_high: bool,
    /// (pv2, pv1, pv0) three-sample rolling window, oldest first.
    pub pv_window: Vec<f64>,
    pub peaks: Vec<(i64, f64)>,
    pub troughs: Vec<(i64, f64)>,
    pub consecutive_read_failures: u32,
    pub started_at: i64,
}

/// Identifies the target of a write-or-add call so the gateway can key
/// the value store and history table consistently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKey<'a> {
    Point(Uuid),
    GlobalVariable(&'a str),
}

/// Batched get/set against the fast KV store. Implementations must
/// return exactly the subset of requested ids that were found — missing
/// ids are simply absent from the result map, never an error.
#[async_trait]
pub trait ValueStoreGateway: Send + Sync {
    /// Reads the *Final* view for each point id. Block inputs read Final.
    async fn get_final(&self, ids: &[Uuid]) -> Result<HashMap<Uuid, ValueEntry>, MemprocError>;

    /// Reads the *Raw* view for each point id. Block outputs write Raw.
    async fn get_raw(&self, ids: &[Uuid]) -> Result<HashMap<Uuid, ValueEntry>, MemprocError>;

    /// Reads the current value of a Global Variable by name.
    async fn get_global_variable(&self, name: &str) -> Result<Option<ValueEntry>, MemprocError>;

    /// Sets the raw entry for a point. If `duration` is given, the write
    /// is an override that expires after `duration` seconds, after which
    /// the prior value resumes. Returns whether the write succeeded.
    /// Always appended to history (partitioned by month upstream).
    async fn write_or_add(
        &self,
        id: Uuid,
        value: &str,
        time: i64,
        duration: Option<i64>,
    ) -> Result<bool, MemprocError>;

    /// Writes a Global Variable's current value.
    async fn write_global_variable(&self, name: &str, value: &str, time: i64) -> Result<bool, MemprocError>;

    async fn set_tuning_state(&self, pid_memory_id: Uuid, state: &TuningState) -> Result<(), MemprocError>;
    async fn get_tuning_state(&self, pid_memory_id: Uuid) -> Result<Option<TuningState>, MemprocError>;
    async fn delete_tuning_state(&self, pid_memory_id: Uuid) -> Result<(), MemprocError>;
}

pub fn final_key(id: Uuid) -> String {
    format!("FinalItem:{id}")
}

pub fn raw_key(id: Uuid) -> String {
    format!("RawItem:{id}")
}

pub fn global_variable_key(name: &str) -> String {
    format!("GlobalVariable:{name}")
}

pub fn pid_tuning_state_key(pid_memory_id: Uuid) -> String {
    format!("PIDTuningState:{pid_memory_id}")
}

pub fn global_variable_usage_index_key(name: &str) -> String {
    format!("UsageIndex:GlobalVariable:{name}")
}
