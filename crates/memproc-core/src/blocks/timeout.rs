//! Timeout Block (spec.md §4.5): input-staleness detection.
//!
//! Pure predicate over current age — no hysteresis, no loop-carried
//! state other than cadence. Writes `"1"` (fault) once the input's age
//! exceeds `timeout_seconds`, else `"0"` (healthy).

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::MemprocError;
use crate::reference::SourceRef;
use crate::scheduler::Block;
use crate::value_store::ValueStoreGateway;

use super::support::{read_final, write_output};

#[derive(Debug, Clone)]
pub struct TimeoutConfig {
    pub id: Uuid,
    pub is_disabled: bool,
    pub interval_seconds: u64,
    pub input_reference: SourceRef,
    pub output_reference: SourceRef,
    pub timeout_seconds: i64,
}

pub struct TimeoutBlock {
    config: TimeoutConfig,
    gateway: Arc<dyn ValueStoreGateway>,
    last_written: Option<bool>,
}

impl TimeoutBlock {
    pub fn new(config: TimeoutConfig, gateway: Arc<dyn ValueStoreGateway>) -> Self {
        Self {
            config,
            gateway,
            last_written: None,
        }
    }
}

#[async_trait]
impl Block for TimeoutBlock {
    fn id(&self) -> Uuid {
        self.config.id
    }
    fn interval_seconds(&self) -> u64 {
        self.config.interval_seconds.max(1)
    }
    fn is_disabled(&self) -> bool {
        self.config.is_disabled
    }

    async fn execute(&mut self, now: i64) -> Result<(), MemprocError> {
        let entry = read_final(self.gateway.as_ref(), &self.config.input_reference)
            .await?
            .ok_or_else(|| MemprocError::Resolve(format!("timeout block {}: input unresolved", self.config.id)))?;

        let faulted = now - entry.time > self.config.timeout_seconds;
        if self.last_written != Some(faulted) {
            let value = if faulted { "1" } else { "0" };
            write_output(self.gateway.as_ref(), &self.config.output_reference, value, now, None).await?;
            self.last_written = Some(faulted);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value_store::mock::MockValueStore;

    fn config(id: Uuid, input: Uuid, output: Uuid) -> TimeoutConfig {
        TimeoutConfig {
            id,
            is_disabled: false,
            interval_seconds: 1,
            input_reference: SourceRef::Point(input),
            output_reference: SourceRef::Point(output),
            timeout_seconds: 10,
        }
    }

    #[tokio::test]
    async fn trips_and_clears_per_the_worked_scenario() {
        let input = Uuid::new_v4();
        let output = Uuid::new_v4();
        let store = Arc::new(MockValueStore::new());
        store.seed_final(input, "42", 1000);

        let mut block = TimeoutBlock::new(config(Uuid::new_v4(), input, output), store.clone());

        block.execute(1009).await.unwrap();
        assert_eq!(store.raw_value(output).unwrap().value, "0");

        block.execute(1011).await.unwrap();
        assert_eq!(store.raw_value(output).unwrap().value, "1");

        store.seed_final(input, "43", 1012);
        block.execute(1012).await.unwrap();
        assert_eq!(store.raw_value(output).unwrap().value, "0");

        assert_eq!(store.write_count(output), 3);
    }

    #[tokio::test]
    async fn skips_tick_when_input_unresolved() {
        let output = Uuid::new_v4();
        let store = Arc::new(MockValueStore::new());
        let mut block = TimeoutBlock::new(config(Uuid::new_v4(), Uuid::new_v4(), output), store.clone());
        assert!(block.execute(1000).await.is_err());
        assert_eq!(store.write_count(output), 0);
    }
}
