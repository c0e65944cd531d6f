//! Statistical Block (spec.md §4.14): rolling or tumbling sample
//! windows with a full descriptive-statistics battery. Hourly pruning
//! (spec.md §4.14, "background task runs hourly") lives in
//! `prune_all_hourly`, invoked by the supervisor on its own timer
//! independent of any block's tick cadence.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::MemprocError;
use crate::reference::SourceRef;
use crate::scheduler::Block;
use crate::value_store::ValueStoreGateway;
use crate::window::{max_retained, WindowBuffer, WindowSample};

use super::support::read_final;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowKind {
    Rolling,
    Tumbling,
}

#[derive(Debug, Clone)]
pub struct StatisticalConfig {
    pub id: Uuid,
    pub is_disabled: bool,
    pub interval_seconds: u64,
    pub input_reference: SourceRef,
    pub window_size: usize,
    pub window_kind: WindowKind,
    /// Percentiles to report, e.g. `[50.0, 90.0, 99.0]`.
    pub percentiles: Vec<f64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatisticalSummary {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub stddev: f64,
    pub range: f64,
    pub median: f64,
    pub coefficient_of_variation: f64,
    pub percentiles: Vec<(f64, f64)>,
}

pub struct StatisticalBlock {
    config: StatisticalConfig,
    gateway: Arc<dyn ValueStoreGateway>,
    window: Arc<dyn WindowBuffer>,
    pub last_summary: Option<StatisticalSummary>,
}

impl StatisticalBlock {
    pub fn new(config: StatisticalConfig, gateway: Arc<dyn ValueStoreGateway>, window: Arc<dyn WindowBuffer>) -> Self {
        Self { config, gateway, window, last_summary: None }
    }

    fn summarize(samples: &[WindowSample], percentiles: &[f64]) -> StatisticalSummary {
        let mut values: Vec<f64> = samples.iter().map(|s| s.value).collect();
        values.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let n = values.len() as f64;
        let min = *values.first().unwrap();
        let max = *values.last().unwrap();
        let mean = values.iter().sum::<f64>() / n;
        let variance = if values.len() > 1 {
            values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0)
        } else {
            0.0
        };
        let stddev = variance.sqrt();
        let median = percentile(&values, 50.0);
        let cv = if mean.abs() <= 1e-10 { 0.0 } else { (stddev / mean).abs() * 100.0 };
        let reported_percentiles = percentiles.iter().map(|&p| (p, percentile(&values, p))).collect();

        StatisticalSummary {
            min,
            max,
            mean,
            stddev,
            range: max - min,
            median,
            coefficient_of_variation: cv,
            percentiles: reported_percentiles,
        }
    }
}

fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.len() == 1 {
        return sorted[0];
    }
    let rank = p / 100.0 * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    if lower == upper {
        sorted[lower]
    } else {
        let frac = rank - lower as f64;
        sorted[lower] + (sorted[upper] - sorted[lower]) * frac
    }
}

#[async_trait]
impl Block for StatisticalBlock {
    fn id(&self) -> Uuid {
        self.config.id
    }
    fn interval_seconds(&self) -> u64 {
        self.config.interval_seconds.max(1)
    }
    fn is_disabled(&self) -> bool {
        self.config.is_disabled
    }

    async fn execute(&mut self, _now: i64) -> Result<(), MemprocError> {
        let entry = read_final(self.gateway.as_ref(), &self.config.input_reference)
            .await?
            .ok_or_else(|| MemprocError::Resolve(format!("statistical block {}: input unresolved", self.config.id)))?;
        let value = entry.as_f64()?;

        self.window
            .push_sample(self.config.id, WindowSample { timestamp: entry.time, value })
            .await?;

        let count = self.window.count(self.config.id).await?;

        match self.config.window_kind {
            WindowKind::Rolling => {
                self.window.prune(self.config.id, max_retained(self.config.window_size)).await?;
                let samples = self.window.recent(self.config.id, self.config.window_size).await?;
                if !samples.is_empty() {
                    self.last_summary = Some(Self::summarize(&samples, &self.config.percentiles));
                }
            }
            WindowKind::Tumbling => {
                if count >= self.config.window_size {
                    let samples = self.window.recent(self.config.id, self.config.window_size).await?;
                    self.last_summary = Some(Self::summarize(&samples, &self.config.percentiles));
                    self.window.clear(self.config.id).await?;
                }
            }
        }
        Ok(())
    }
}

/// Hourly pruning pass (spec.md §4.14): for every statistical block,
/// retain only the most recent `⌈window_size × 1.2⌉` samples.
pub async fn prune_all_hourly(
    window: &dyn WindowBuffer,
    window_sizes: &HashMap<Uuid, usize>,
) -> Result<(), MemprocError> {
    let retain: HashMap<Uuid, usize> = window_sizes.iter().map(|(&id, &size)| (id, max_retained(size))).collect();
    window.prune_all(&retain).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value_store::mock::MockValueStore;
    use crate::window::mock::MockWindowBuffer;

    #[tokio::test]
    async fn rolling_window_reports_full_stats_battery() {
        let input = Uuid::new_v4();
        let store = Arc::new(MockValueStore::new());
        let window = Arc::new(MockWindowBuffer::new());
        let config = StatisticalConfig {
            id: Uuid::new_v4(),
            is_disabled: false,
            interval_seconds: 1,
            input_reference: SourceRef::Point(input),
            window_size: 5,
            window_kind: WindowKind::Rolling,
            percentiles: vec![50.0, 90.0],
        };
        let mut block = StatisticalBlock::new(config, store.clone(), window);

        for (t, v) in [1.0, 2.0, 3.0, 4.0, 5.0].iter().enumerate() {
            store.seed_final(input, v.to_string(), t as i64);
            block.execute(t as i64).await.unwrap();
        }
        let summary = block.last_summary.unwrap();
        assert_eq!(summary.min, 1.0);
        assert_eq!(summary.max, 5.0);
        assert_eq!(summary.mean, 3.0);
        assert_eq!(summary.median, 3.0);
        assert_eq!(summary.range, 4.0);
    }

    #[tokio::test]
    async fn tumbling_window_clears_after_completion() {
        let input = Uuid::new_v4();
        let store = Arc::new(MockValueStore::new());
        let window = Arc::new(MockWindowBuffer::new());
        let config = StatisticalConfig {
            id: Uuid::new_v4(),
            is_disabled: false,
            interval_seconds: 1,
            input_reference: SourceRef::Point(input),
            window_size: 3,
            window_kind: WindowKind::Tumbling,
            percentiles: vec![],
        };
        let block_id = config.id;
        let mut block = StatisticalBlock::new(config, store.clone(), window.clone());

        for (t, v) in [10.0, 20.0, 30.0].iter().enumerate() {
            store.seed_final(input, v.to_string(), t as i64);
            block.execute(t as i64).await.unwrap();
        }
        assert!(block.last_summary.is_some());
        assert_eq!(window.count(block_id).await.unwrap(), 0, "tumbling window clears on completion");
    }
}
