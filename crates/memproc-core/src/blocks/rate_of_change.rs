//! Rate-of-Change Block (spec.md §4.12): three computation modes, an
//! optional one-pole smoothing filter, and a symmetric latching alarm.

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::MemprocError;
use crate::reference::SourceRef;
use crate::scheduler::Block;
use crate::value_store::ValueStoreGateway;
use crate::window::{max_retained, WindowBuffer, WindowSample};

use super::support::{read_final, write_output};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateComputation {
    SimpleTwoPoint,
    MovingAverageOfDifferences,
    LinearRegressionSlope,
}

#[derive(Debug, Clone)]
pub struct RateOfChangeConfig {
    pub id: Uuid,
    pub is_disabled: bool,
    pub interval_seconds: u64,
    pub input_reference: SourceRef,
    pub output_reference: SourceRef,
    pub window_size: usize,
    pub computation: RateComputation,
    /// One-pole smoothing factor in `[0, 1]`; `None` disables smoothing.
    pub smoothing_alpha: Option<f64>,
    pub alarm_output_reference: Option<SourceRef>,
    pub high_threshold: Option<f64>,
    pub high_hysteresis: Option<f64>,
    pub low_threshold: Option<f64>,
    pub low_hysteresis: Option<f64>,
}

pub struct RateOfChangeBlock {
    config: RateOfChangeConfig,
    gateway: Arc<dyn ValueStoreGateway>,
    window: Arc<dyn WindowBuffer>,
    smoothed: Option<f64>,
    alarm_latched: bool,
}

impl RateOfChangeBlock {
    pub fn new(config: RateOfChangeConfig, gateway: Arc<dyn ValueStoreGateway>, window: Arc<dyn WindowBuffer>) -> Self {
        Self {
            config,
            gateway,
            window,
            smoothed: None,
            alarm_latched: false,
        }
    }

    /// A hash of this block's configuration, used by the supervisor to
    /// detect configuration changes across reloads (spec.md §4.12: samples
    /// are cleared when a block's configuration changes).
    pub fn config_hash(&self) -> u64 {
        use std::hash::{Hash, Hasher};
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        format!("{:?}", self.config).hash(&mut hasher);
        hasher.finish()
    }

    fn compute_rate(&self, samples: &[WindowSample]) -> Option<f64> {
        match self.config.computation {
            RateComputation::SimpleTwoPoint => {
                let first = samples.first()?;
                let last = samples.last()?;
                let dt = (last.timestamp - first.timestamp) as f64;
                if dt <= 0.0 {
                    return None;
                }
                Some((last.value - first.value) / dt)
            }
            RateComputation::MovingAverageOfDifferences => {
                if samples.len() < 2 {
                    return None;
                }
                let diffs: Vec<f64> = samples
                    .windows(2)
                    .filter_map(|w| {
                        let dt = (w[1].timestamp - w[0].timestamp) as f64;
                        if dt > 0.0 { Some((w[1].value - w[0].value) / dt) } else { None }
                    })
                    .collect();
                if diffs.is_empty() {
                    return None;
                }
                Some(diffs.iter().sum::<f64>() / diffs.len() as f64)
            }
            RateComputation::LinearRegressionSlope => {
                if samples.len() < 5 {
                    return None;
                }
                let n = samples.len() as f64;
                let t0 = samples[0].timestamp as f64;
                let xs: Vec<f64> = samples.iter().map(|s| (s.timestamp as f64) - t0).collect();
                let ys: Vec<f64> = samples.iter().map(|s| s.value).collect();
                let x_mean = xs.iter().sum::<f64>() / n;
                let y_mean = ys.iter().sum::<f64>() / n;
                let num: f64 = xs.iter().zip(&ys).map(|(x, y)| (x - x_mean) * (y - y_mean)).sum();
                let den: f64 = xs.iter().map(|x| (x - x_mean).powi(2)).sum();
                if den.abs() <= f64::EPSILON {
                    return None;
                }
                Some(num / den)
            }
        }
    }

    fn evaluate_alarm(&mut self, rate: f64) -> Option<bool> {
        let mut next = self.alarm_latched;
        if let (Some(high), Some(high_h)) = (self.config.high_threshold, self.config.high_hysteresis) {
            if !self.alarm_latched && rate > high + high_h * high.abs() {
                next = true;
            } else if self.alarm_latched && rate < high - high_h * high.abs() {
                next = false;
            }
        }
        if let (Some(low), Some(low_h)) = (self.config.low_threshold, self.config.low_hysteresis) {
            if !self.alarm_latched && rate < low - low_h * low.abs() {
                next = true;
            } else if self.alarm_latched && rate > low + low_h * low.abs() {
                next = false;
            }
        }
        if next != self.alarm_latched {
            self.alarm_latched = next;
            Some(next)
        } else {
            None
        }
    }
}

#[async_trait]
impl Block for RateOfChangeBlock {
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
            .ok_or_else(|| MemprocError::Resolve(format!("rate-of-change block {}: input unresolved", self.config.id)))?;
        let value = entry.as_f64()?;

        self.window
            .push_sample(self.config.id, WindowSample { timestamp: entry.time, value })
            .await?;
        self.window.prune(self.config.id, max_retained(self.config.window_size)).await?;

        let samples = self.window.recent(self.config.id, self.config.window_size).await?;
        let Some(mut rate) = self.compute_rate(&samples) else {
            return Ok(());
        };

        if let Some(alpha) = self.config.smoothing_alpha {
            rate = match self.smoothed {
                Some(prev) => alpha * rate + (1.0 - alpha) * prev,
                None => rate,
            };
        }
        self.smoothed = Some(rate);

        write_output(self.gateway.as_ref(), &self.config.output_reference, &rate.to_string(), now, None).await?;

        if let Some(alarm_ref) = self.config.alarm_output_reference.clone()
            && let Some(latched) = self.evaluate_alarm(rate)
        {
            write_output(self.gateway.as_ref(), &alarm_ref, if latched { "1" } else { "0" }, now, None).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value_store::mock::MockValueStore;
    use crate::window::mock::MockWindowBuffer;

    #[tokio::test]
    async fn simple_two_point_rate_over_window() {
        let input = Uuid::new_v4();
        let output = Uuid::new_v4();
        let store = Arc::new(MockValueStore::new());
        let window = Arc::new(MockWindowBuffer::new());
        let config = RateOfChangeConfig {
            id: Uuid::new_v4(),
            is_disabled: false,
            interval_seconds: 1,
            input_reference: SourceRef::Point(input),
            output_reference: SourceRef::Point(output),
            window_size: 3,
            computation: RateComputation::SimpleTwoPoint,
            smoothing_alpha: None,
            alarm_output_reference: None,
            high_threshold: None,
            high_hysteresis: None,
            low_threshold: None,
            low_hysteresis: None,
        };
        let mut block = RateOfChangeBlock::new(config, store.clone(), window);

        for (t, v) in [(0, 0.0), (1, 10.0), (2, 20.0)] {
            store.seed_final(input, v.to_string(), t);
            block.execute(t).await.unwrap();
        }
        // (20 - 0) / (2 - 0) = 10/s
        let written: f64 = store.raw_value(output).unwrap().value.parse().unwrap();
        assert!((written - 10.0).abs() < 1e-9, "got {written}");
    }
}
