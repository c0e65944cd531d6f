//! In-memory fake of the Value Store Gateway, analogous to the teacher's
//! `collector::mock` filesystem fake. Used by block unit tests so the
//! twelve algorithm modules can be exercised without a live Redis.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::MemprocError;

use super::{TuningState, ValueEntry, ValueStoreGateway};

#[derive(Default)]
pub struct MockValueStore {
    raw: Mutex<HashMap<Uuid, ValueEntry>>,
    r#final: Mutex<HashMap<Uuid, ValueEntry>>,
    global_variables: Mutex<HashMap<String, ValueEntry>>,
    tuning: Mutex<HashMap<Uuid, TuningState>>,
    write_counts: Mutex<HashMap<Uuid, usize>>,
}

impl MockValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_final(&self, id: Uuid, value: impl Into<String>, time: i64) {
        self.r#final
            .lock()
            .unwrap()
            .insert(id, ValueEntry::new(value, time));
    }

    pub fn seed_raw(&self, id: Uuid, value: impl Into<String>, time: i64) {
        self.raw.lock().unwrap().insert(id, ValueEntry::new(value, time));
    }

    pub fn seed_global_variable(&self, name: &str, value: impl Into<String>, time: i64) {
        self.global_variables
            .lock()
            .unwrap()
            .insert(name.to_string(), ValueEntry::new(value, time));
    }

    /// Removes a previously-seeded Final entry, simulating an input that
    /// has gone missing.
    pub fn drop_final(&self, id: Uuid) {
        self.r#final.lock().unwrap().remove(&id);
    }

    pub fn raw_value(&self, id: Uuid) -> Option<ValueEntry> {
        self.raw.lock().unwrap().get(&id).cloned()
    }

    /// Number of times `write_or_add` has been called for `id`, so tests
    /// can assert a no-write-on-unchanged-value contract.
    pub fn write_count(&self, id: Uuid) -> usize {
        self.write_counts.lock().unwrap().get(&id).copied().unwrap_or(0)
    }
}

#[async_trait]
impl ValueStoreGateway for MockValueStore {
    async fn get_final(&self, ids: &[Uuid]) -> Result<HashMap<Uuid, ValueEntry>, MemprocError> {
        let store = self.r#final.lock().unwrap();
        Ok(ids.iter().filter_map(|id| store.get(id).map(|v| (*id, v.clone()))).collect())
    }

    async fn get_raw(&self, ids: &[Uuid]) -> Result<HashMap<Uuid, ValueEntry>, MemprocError> {
        let store = self.raw.lock().unwrap();
        Ok(ids.iter().filter_map(|id| store.get(id).map(|v| (*id, v.clone()))).collect())
    }

    async fn get_global_variable(&self, name: &str) -> Result<Option<ValueEntry>, MemprocError> {
        Ok(self.global_variables.lock().unwrap().get(name).cloned())
    }

    async fn write_or_add(
        &self,
        id: Uuid,
        value: &str,
        time: i64,
        _duration: Option<i64>,
    ) -> Result<bool, MemprocError> {
        self.raw.lock().unwrap().insert(id, ValueEntry::new(value, time));
        *self.write_counts.lock().unwrap().entry(id).or_insert(0) += 1;
        Ok(true)
    }

    async fn write_global_variable(&self, name: &str, value: &str, time: i64) -> Result<bool, MemprocError> {
        self.global_variables
            .lock()
            .unwrap()
            .insert(name.to_string(), ValueEntry::new(value, time));
        Ok(true)
    }

    async fn set_tuning_state(&self, pid_memory_id: Uuid, state: &TuningState) -> Result<(), MemprocError> {
        self.tuning.lock().unwrap().insert(pid_memory_id, state.clone());
        Ok(())
    }

    async fn get_tuning_state(&self, pid_memory_id: Uuid) -> Result<Option<TuningState>, MemprocError> {
        Ok(self.tuning.lock().unwrap().get(&pid_memory_id).cloned())
    }

    async fn delete_tuning_state(&self, pid_memory_id: Uuid) -> Result<(), MemprocError> {
        self.tuning.lock().unwrap().remove(&pid_memory_id);
        Ok(())
    }
}
