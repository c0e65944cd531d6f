//! Average Block (spec.md §4.10): weighted mean with optional staleness
//! filtering and single-pass outlier elimination (spec.md §9 Open
//! Question: resolved single-pass, matching the source).

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::MemprocError;
use crate::reference::SourceRef;
use crate::scheduler::Block;
use crate::value_store::ValueStoreGateway;

use super::support::{read_final, round_to, write_output};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutlierDetection {
    None,
    Iqr,
    ZScore,
    Mad,
}

#[derive(Debug, Clone)]
pub struct AverageConfig {
    pub id: Uuid,
    pub is_disabled: bool,
    pub interval_seconds: u64,
    pub inputs: Vec<SourceRef>,
    pub weights: Option<Vec<f64>>,
    pub ignore_stale: bool,
    pub stale_timeout: i64,
    pub minimum_inputs: usize,
    pub outlier_detection: OutlierDetection,
    pub outlier_threshold: f64,
    pub decimal_places: u32,
    pub output_reference: SourceRef,
}

pub struct AverageBlock {
    config: AverageConfig,
    gateway: Arc<dyn ValueStoreGateway>,
}

impl AverageBlock {
    pub fn new(config: AverageConfig, gateway: Arc<dyn ValueStoreGateway>) -> Self {
        Self { config, gateway }
    }

    /// Single-pass outlier elimination: computes the reference statistic
    /// once over the full surviving set and filters against it. Does not
    /// iterate to a fixed point.
    fn remove_outliers(samples: Vec<(f64, f64)>, detection: OutlierDetection, threshold: f64) -> Vec<(f64, f64)> {
        if detection == OutlierDetection::None || samples.len() < 3 {
            return samples;
        }
        let values: Vec<f64> = samples.iter().map(|(v, _)| *v).collect();
        match detection {
            OutlierDetection::Iqr => {
                let mut sorted = values.clone();
                sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
                let q1 = percentile(&sorted, 25.0);
                let q3 = percentile(&sorted, 75.0);
                let iqr = q3 - q1;
                let lo = q1 - threshold * iqr;
                let hi = q3 + threshold * iqr;
                samples.into_iter().filter(|(v, _)| *v >= lo && *v <= hi).collect()
            }
            OutlierDetection::ZScore => {
                let mean = values.iter().sum::<f64>() / values.len() as f64;
                let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
                let stddev = variance.sqrt();
                if stddev <= f64::EPSILON {
                    return samples;
                }
                samples
                    .into_iter()
                    .filter(|(v, _)| ((v - mean) / stddev).abs() <= threshold)
                    .collect()
            }
            OutlierDetection::Mad => {
                let mut sorted = values.clone();
                sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
                let median = percentile(&sorted, 50.0);
                let mut deviations: Vec<f64> = values.iter().map(|v| (v - median).abs()).collect();
                deviations.sort_by(|a, b| a.partial_cmp(b).unwrap());
                let mad = percentile(&deviations, 50.0);
                if mad <= f64::EPSILON {
                    return samples;
                }
                samples
                    .into_iter()
                    .filter(|(v, _)| (0.6745 * (v - median) / mad).abs() <= threshold)
                    .collect()
            }
            OutlierDetection::None => samples,
        }
    }
}

/// Linear-interpolation percentile over an already-sorted slice.
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
impl Block for AverageBlock {
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
        let weights = self.config.weights.clone().unwrap_or_else(|| vec![1.0; self.config.inputs.len()]);
        if weights.len() != self.config.inputs.len() {
            return Err(MemprocError::Configuration(
                "average block weights length must equal inputs length".to_string(),
            ));
        }

        let mut samples = Vec::with_capacity(self.config.inputs.len());
        for (reference, &weight) in self.config.inputs.iter().zip(weights.iter()) {
            let Some(entry) = read_final(self.gateway.as_ref(), reference).await? else {
                continue;
            };
            if self.config.ignore_stale && now - entry.time > self.config.stale_timeout {
                continue;
            }
            let Ok(value) = entry.as_f64() else { continue };
            samples.push((value, weight));
        }

        if samples.len() < self.config.minimum_inputs {
            return Err(MemprocError::Resolve(format!(
                "average block {}: {} surviving input(s), need {}",
                self.config.id,
                samples.len(),
                self.config.minimum_inputs
            )));
        }

        let filtered = Self::remove_outliers(samples, self.config.outlier_detection, self.config.outlier_threshold);
        if filtered.is_empty() {
            return Err(MemprocError::Resolve(format!(
                "average block {}: no inputs survived outlier elimination",
                self.config.id
            )));
        }

        let weight_sum: f64 = filtered.iter().map(|(_, w)| w).sum();
        let weighted_sum: f64 = filtered.iter().map(|(v, w)| v * w).sum();
        let mean = if weight_sum.abs() > f64::EPSILON { weighted_sum / weight_sum } else { 0.0 };

        let rounded = round_to(mean, self.config.decimal_places);
        write_output(
            self.gateway.as_ref(),
            &self.config.output_reference,
            &format!("{rounded:.*}", self.config.decimal_places as usize),
            now,
            None,
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value_store::mock::MockValueStore;

    #[tokio::test]
    async fn weighted_mean_over_two_inputs() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let output = Uuid::new_v4();
        let store = Arc::new(MockValueStore::new());
        store.seed_final(a, "10", 0);
        store.seed_final(b, "20", 0);
        let config = AverageConfig {
            id: Uuid::new_v4(),
            is_disabled: false,
            interval_seconds: 1,
            inputs: vec![SourceRef::Point(a), SourceRef::Point(b)],
            weights: Some(vec![3.0, 1.0]),
            ignore_stale: false,
            stale_timeout: 0,
            minimum_inputs: 1,
            outlier_detection: OutlierDetection::None,
            outlier_threshold: 0.0,
            decimal_places: 2,
            output_reference: SourceRef::Point(output),
        };
        let mut block = AverageBlock::new(config, store.clone());
        block.execute(1).await.unwrap();
        // (10*3 + 20*1) / 4 = 12.5
        assert_eq!(store.raw_value(output).unwrap().value, "12.50");
    }

    #[tokio::test]
    async fn iqr_outlier_is_excluded() {
        let store = Arc::new(MockValueStore::new());
        let ids: Vec<Uuid> = (0..5).map(|_| Uuid::new_v4()).collect();
        for (i, &v) in [10.0, 11.0, 9.0, 10.0, 1000.0].iter().enumerate() {
            store.seed_final(ids[i], v.to_string(), 0);
        }
        let output = Uuid::new_v4();
        let config = AverageConfig {
            id: Uuid::new_v4(),
            is_disabled: false,
            interval_seconds: 1,
            inputs: ids.into_iter().map(SourceRef::Point).collect(),
            weights: None,
            ignore_stale: false,
            stale_timeout: 0,
            minimum_inputs: 1,
            outlier_detection: OutlierDetection::Iqr,
            outlier_threshold: 1.5,
            decimal_places: 0,
            output_reference: SourceRef::Point(output),
        };
        let mut block = AverageBlock::new(config, store.clone());
        block.execute(1).await.unwrap();
        let result: f64 = store.raw_value(output).unwrap().value.parse().unwrap();
        assert!(result < 20.0, "outlier 1000 should have been excluded, got {result}");
    }
}
