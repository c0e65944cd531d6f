//! Totalizer Block (spec.md §4.7): rate integration or event counting,
//! with independent overflow/scheduled/manual reset policies.

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::boolean_parse::parse_bool;
use crate::cron_driver::CronDriver;
use crate::error::MemprocError;
use crate::reference::SourceRef;
use crate::scheduler::Block;
use crate::value_store::ValueStoreGateway;

use super::support::{read_final, round_to, write_output};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TotalizerMode {
    RateIntegration,
    EventCountRising,
    EventCountFalling,
    EventCountBoth,
}

#[derive(Debug, Clone)]
pub struct TotalizerConfig {
    pub id: Uuid,
    pub is_disabled: bool,
    pub interval_seconds: u64,
    pub mode: TotalizerMode,
    pub input_reference: SourceRef,
    pub output_reference: SourceRef,
    pub decimal_places: u32,
    pub reset_on_overflow: bool,
    pub overflow_threshold: f64,
    pub scheduled_reset_cron: Option<String>,
    pub manual_reset_enabled: bool,
}

/// Persisted accumulator state (spec.md §6: one row per block).
#[derive(Debug, Clone, Default)]
pub struct TotalizerState {
    pub accumulator: f64,
    pub baseline_value: Option<f64>,
    pub baseline_bool: Option<bool>,
    pub last_sample_time: Option<i64>,
    pub last_scheduled_reset: Option<chrono::DateTime<chrono::Utc>>,
}

pub struct TotalizerBlock {
    config: TotalizerConfig,
    gateway: Arc<dyn ValueStoreGateway>,
    state: TotalizerState,
    cron: Option<CronDriver>,
    /// Set by the operator API between ticks; consumed on the next tick.
    pub manual_reset_requested: bool,
}

impl TotalizerBlock {
    pub fn new(
        config: TotalizerConfig,
        gateway: Arc<dyn ValueStoreGateway>,
        state: TotalizerState,
    ) -> Result<Self, MemprocError> {
        let cron = config
            .scheduled_reset_cron
            .as_deref()
            .map(CronDriver::parse)
            .transpose()?;
        Ok(Self {
            config,
            gateway,
            state,
            cron,
            manual_reset_requested: false,
        })
    }

    pub fn state(&self) -> &TotalizerState {
        &self.state
    }

    fn reset(&mut self) {
        self.state.accumulator = 0.0;
        self.state.baseline_value = None;
        self.state.baseline_bool = None;
    }
}

#[async_trait]
impl Block for TotalizerBlock {
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
            .ok_or_else(|| MemprocError::Resolve(format!("totalizer block {}: input unresolved", self.config.id)))?;

        let mut changed = false;

        if self.config.manual_reset_enabled && self.manual_reset_requested {
            self.reset();
            self.manual_reset_requested = false;
            changed = true;
        }

        if let Some(cron) = &self.cron {
            let now_dt = chrono::DateTime::from_timestamp(now, 0).unwrap_or_else(chrono::Utc::now);
            if cron.is_due(self.state.last_scheduled_reset, now_dt) {
                self.reset();
                self.state.last_scheduled_reset = Some(now_dt);
                changed = true;
            }
        }

        match self.config.mode {
            TotalizerMode::RateIntegration => {
                let value = entry.as_f64()?;
                if let (Some(prev_value), Some(_prev_time)) =
                    (self.state.baseline_value, self.state.last_sample_time)
                {
                    let dt = self.config.interval_seconds as f64;
                    self.state.accumulator += (prev_value + value) / 2.0 * dt;
                    changed = true;
                }
                self.state.baseline_value = Some(value);
                self.state.last_sample_time = Some(entry.time);
            }
            TotalizerMode::EventCountRising | TotalizerMode::EventCountFalling | TotalizerMode::EventCountBoth => {
                let value = parse_bool(&entry.value)?;
                if let Some(prev) = self.state.baseline_bool {
                    let rising = !prev && value;
                    let falling = prev && !value;
                    let counted = match self.config.mode {
                        TotalizerMode::EventCountRising => rising,
                        TotalizerMode::EventCountFalling => falling,
                        TotalizerMode::EventCountBoth => rising || falling,
                        TotalizerMode::RateIntegration => unreachable!(),
                    };
                    if counted {
                        self.state.accumulator += 1.0;
                        changed = true;
                    }
                }
                self.state.baseline_bool = Some(value);
            }
        }

        if self.config.reset_on_overflow && self.state.accumulator >= self.config.overflow_threshold {
            self.reset();
            changed = true;
        }

        if changed {
            let rounded = round_to(self.state.accumulator, self.config.decimal_places);
            write_output(
                self.gateway.as_ref(),
                &self.config.output_reference,
                &format!("{rounded:.*}", self.config.decimal_places as usize),
                now,
                None,
            )
            .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value_store::mock::MockValueStore;

    fn config(id: Uuid, input: Uuid, output: Uuid) -> TotalizerConfig {
        TotalizerConfig {
            id,
            is_disabled: false,
            interval_seconds: 1,
            mode: TotalizerMode::RateIntegration,
            input_reference: SourceRef::Point(input),
            output_reference: SourceRef::Point(output),
            decimal_places: 0,
            reset_on_overflow: false,
            overflow_threshold: f64::MAX,
            scheduled_reset_cron: None,
            manual_reset_enabled: false,
        }
    }

    #[tokio::test]
    async fn rate_integration_matches_worked_scenario() {
        let input = Uuid::new_v4();
        let output = Uuid::new_v4();
        let store = Arc::new(MockValueStore::new());
        let mut block =
            TotalizerBlock::new(config(Uuid::new_v4(), input, output), store.clone(), TotalizerState::default())
                .unwrap();

        let samples = [10.0, 10.0, 20.0, 20.0, 20.0];
        let expected_acc = [0.0, 10.0, 25.0, 45.0, 65.0];
        for (t, (&v, &exp)) in samples.iter().zip(expected_acc.iter()).enumerate() {
            store.seed_final(input, v.to_string(), t as i64 + 1);
            block.execute(t as i64 + 1).await.unwrap();
            assert_eq!(block.state().accumulator, exp, "tick {t}");
        }
    }

    #[tokio::test]
    async fn event_count_rising_counts_only_rising_edges() {
        let input = Uuid::new_v4();
        let output = Uuid::new_v4();
        let store = Arc::new(MockValueStore::new());
        let mut cfg = config(Uuid::new_v4(), input, output);
        cfg.mode = TotalizerMode::EventCountRising;
        let mut block = TotalizerBlock::new(cfg, store.clone(), TotalizerState::default()).unwrap();

        for (t, v) in ["0", "1", "1", "0", "1"].iter().enumerate() {
            store.seed_final(input, *v, t as i64);
            block.execute(t as i64).await.unwrap();
        }
        // baseline=0 (t0), rising at t1, none at t2 (already high), none at t3 (falling), rising at t4
        assert_eq!(block.state().accumulator, 2.0);
    }

    #[tokio::test]
    async fn overflow_resets_accumulator() {
        let input = Uuid::new_v4();
        let output = Uuid::new_v4();
        let store = Arc::new(MockValueStore::new());
        let mut cfg = config(Uuid::new_v4(), input, output);
        cfg.reset_on_overflow = true;
        cfg.overflow_threshold = 20.0;
        let mut block = TotalizerBlock::new(cfg, store.clone(), TotalizerState::default()).unwrap();

        for (t, v) in [10.0, 10.0, 10.0].iter().enumerate() {
            store.seed_final(input, v.to_string(), t as i64 + 1);
            block.execute(t as i64 + 1).await.unwrap();
        }
        assert_eq!(block.state().accumulator, 0.0);
    }
}
