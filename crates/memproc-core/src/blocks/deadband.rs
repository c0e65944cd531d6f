//! Deadband Block (spec.md §4.11): analog magnitude filtering or digital
//! stability-time debounce.

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::boolean_parse::parse_bool;
use crate::error::MemprocError;
use crate::reference::SourceRef;
use crate::scheduler::Block;
use crate::value_store::ValueStoreGateway;

use super::support::{read_final, write_output};

#[derive(Debug, Clone, Copy)]
pub enum DeadbandMode {
    AnalogAbsolute { deadband: f64 },
    AnalogPercentage { deadband_percent: f64, input_min: f64, input_max: f64 },
    Digital { stability_time: i64 },
}

#[derive(Debug, Clone)]
pub struct DeadbandConfig {
    pub id: Uuid,
    pub is_disabled: bool,
    pub interval_seconds: u64,
    pub mode: DeadbandMode,
    pub input_reference: SourceRef,
    pub output_reference: SourceRef,
}

#[derive(Default)]
struct DeadbandState {
    last_output: Option<f64>,
    pending_digital_state: Option<bool>,
    last_change_time: Option<i64>,
}

pub struct DeadbandBlock {
    config: DeadbandConfig,
    gateway: Arc<dyn ValueStoreGateway>,
    state: DeadbandState,
}

impl DeadbandBlock {
    pub fn new(config: DeadbandConfig, gateway: Arc<dyn ValueStoreGateway>) -> Self {
        Self {
            config,
            gateway,
            state: DeadbandState::default(),
        }
    }
}

#[async_trait]
impl Block for DeadbandBlock {
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
            .ok_or_else(|| MemprocError::Resolve(format!("deadband block {}: input unresolved", self.config.id)))?;

        match self.config.mode {
            DeadbandMode::Digital { stability_time } => {
                let value = parse_bool(&entry.value)?;
                let committed = self.state.last_output.map(|v| v > 0.5);

                if committed != Some(value) {
                    if self.state.pending_digital_state != Some(value) {
                        self.state.pending_digital_state = Some(value);
                        self.state.last_change_time = Some(now);
                    }
                    let held_for = now - self.state.last_change_time.unwrap_or(now);
                    if held_for >= stability_time {
                        self.state.last_output = Some(if value { 1.0 } else { 0.0 });
                        write_output(
                            self.gateway.as_ref(),
                            &self.config.output_reference,
                            if value { "1" } else { "0" },
                            now,
                            None,
                        )
                        .await?;
                    }
                } else {
                    self.state.pending_digital_state = None;
                    self.state.last_change_time = None;
                }
            }
            DeadbandMode::AnalogAbsolute { deadband } => {
                let value = entry.as_f64()?;
                let passes = match self.state.last_output {
                    None => true,
                    Some(last) => (value - last).abs() >= deadband,
                };
                if passes {
                    self.state.last_output = Some(value);
                    write_output(self.gateway.as_ref(), &self.config.output_reference, &value.to_string(), now, None)
                        .await?;
                }
            }
            DeadbandMode::AnalogPercentage { deadband_percent, input_min, input_max } => {
                let value = entry.as_f64()?;
                let band = deadband_percent / 100.0 * (input_max - input_min);
                let passes = match self.state.last_output {
                    None => true,
                    Some(last) => (value - last).abs() >= band,
                };
                if passes {
                    self.state.last_output = Some(value);
                    write_output(self.gateway.as_ref(), &self.config.output_reference, &value.to_string(), now, None)
                        .await?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value_store::mock::MockValueStore;

    #[tokio::test]
    async fn analog_passes_on_first_sample_then_honors_deadband() {
        let input = Uuid::new_v4();
        let output = Uuid::new_v4();
        let store = Arc::new(MockValueStore::new());
        let config = DeadbandConfig {
            id: Uuid::new_v4(),
            is_disabled: false,
            interval_seconds: 1,
            mode: DeadbandMode::AnalogAbsolute { deadband: 5.0 },
            input_reference: SourceRef::Point(input),
            output_reference: SourceRef::Point(output),
        };
        let mut block = DeadbandBlock::new(config, store.clone());

        store.seed_final(input, "100", 0);
        block.execute(0).await.unwrap();
        assert_eq!(store.write_count(output), 1);

        store.seed_final(input, "102", 1);
        block.execute(1).await.unwrap();
        assert_eq!(store.write_count(output), 1, "within deadband, no write");

        store.seed_final(input, "107", 2);
        block.execute(2).await.unwrap();
        assert_eq!(store.write_count(output), 2, "exceeds deadband, writes");
    }

    #[tokio::test]
    async fn digital_requires_stability_before_committing() {
        let input = Uuid::new_v4();
        let output = Uuid::new_v4();
        let store = Arc::new(MockValueStore::new());
        let config = DeadbandConfig {
            id: Uuid::new_v4(),
            is_disabled: false,
            interval_seconds: 1,
            mode: DeadbandMode::Digital { stability_time: 3 },
            input_reference: SourceRef::Point(input),
            output_reference: SourceRef::Point(output),
        };
        let mut block = DeadbandBlock::new(config, store.clone());

        for t in 0..3 {
            store.seed_final(input, "1", t);
            block.execute(t).await.unwrap();
            assert_eq!(store.write_count(output), 0, "not yet held for stability_time at t={t}");
        }
        store.seed_final(input, "1", 3);
        block.execute(3).await.unwrap();
        assert_eq!(store.write_count(output), 1, "held for 3s, commits");

        store.seed_final(input, "0", 4);
        block.execute(4).await.unwrap();
        assert_eq!(store.write_count(output), 1, "candidate just changed, not yet stable");

        store.seed_final(input, "0", 7);
        block.execute(7).await.unwrap();
        assert_eq!(store.write_count(output), 2, "new candidate held for stability_time, commits");
    }
}
