//! Comparison Block (spec.md §4.6): N-of-M voting across groups,
//! combined by an outer AND/OR/XOR operator.
//!
//! Threshold hysteresis and voting hysteresis are both loop-carried
//! state (spec.md §9): per-input ON/OFF state for threshold banding, and
//! per-group ON/OFF state for the vote-count band. Neither is folded
//! into a pure function — ticks must observe the prior tick's state.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::MemprocError;
use crate::reference::SourceRef;
use crate::scheduler::Block;
use crate::value_store::ValueStoreGateway;

use super::support::{read_final, write_output};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupMode {
    Analog,
    Digital,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalogCompareType {
    Higher,
    Lower,
    Equal,
    NotEqual,
    Between,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OuterOperator {
    And,
    Or,
    Xor,
}

#[derive(Debug, Clone)]
pub struct ComparisonGroup {
    pub inputs: Vec<SourceRef>,
    pub mode: GroupMode,
    pub compare_type: AnalogCompareType,
    pub threshold1: f64,
    pub threshold2: Option<f64>,
    pub threshold_hysteresis: f64,
    pub required_votes: u32,
    pub voting_hysteresis: u32,
    pub digital_value: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct ComparisonConfig {
    pub id: Uuid,
    pub is_disabled: bool,
    pub interval_seconds: u64,
    pub groups: Vec<ComparisonGroup>,
    pub outer_operator: OuterOperator,
    pub invert_output: bool,
    pub output_reference: SourceRef,
}

/// Per-input and per-group loop-carried hysteresis state, indexed
/// `[group_index][input_index]` for inputs and `[group_index]` for the
/// group vote band.
#[derive(Default)]
struct HysteresisState {
    input_on: HashMap<(usize, usize), bool>,
    group_on: HashMap<usize, bool>,
}

pub struct ComparisonBlock {
    config: ComparisonConfig,
    gateway: Arc<dyn ValueStoreGateway>,
    state: HysteresisState,
    last_written: Option<bool>,
}

impl ComparisonBlock {
    pub fn new(config: ComparisonConfig, gateway: Arc<dyn ValueStoreGateway>) -> Self {
        Self {
            config,
            gateway,
            state: HysteresisState::default(),
            last_written: None,
        }
    }

    fn evaluate_analog_input(
        on_band: bool,
        compare_type: AnalogCompareType,
        value: f64,
        threshold1: f64,
        threshold2: Option<f64>,
        hysteresis: f64,
    ) -> bool {
        // ON band is offset from OFF band by ± hysteresis symmetrically;
        // which band applies depends on the input's current state.
        let h = if on_band { -hysteresis } else { hysteresis };
        match compare_type {
            AnalogCompareType::Higher => value > threshold1 + h,
            AnalogCompareType::Lower => value < threshold1 - h,
            AnalogCompareType::Equal => (value - threshold1).abs() <= hysteresis,
            AnalogCompareType::NotEqual => (value - threshold1).abs() > hysteresis,
            AnalogCompareType::Between => {
                let hi = threshold2.unwrap_or(threshold1);
                value >= threshold1 + h && value <= hi - h
            }
        }
    }

    async fn evaluate_group(
        &mut self,
        group_index: usize,
        now: i64,
    ) -> Result<bool, MemprocError> {
        let group = &self.config.groups[group_index];
        let mut votes = 0u32;
        for (input_index, reference) in group.inputs.iter().enumerate() {
            let entry = read_final(self.gateway.as_ref(), reference).await?;
            let Some(entry) = entry else { continue };

            let is_on = match group.mode {
                GroupMode::Digital => {
                    let parsed = entry.as_bool()?;
                    let expected = group.digital_value.unwrap_or(true);
                    parsed == expected
                }
                GroupMode::Analog => {
                    let value = entry.as_f64()?;
                    let on_band = self
                        .state
                        .input_on
                        .get(&(group_index, input_index))
                        .copied()
                        .unwrap_or(false);
                    Self::evaluate_analog_input(
                        on_band,
                        group.compare_type,
                        value,
                        group.threshold1,
                        group.threshold2,
                        group.threshold_hysteresis,
                    )
                }
            };
            self.state.input_on.insert((group_index, input_index), is_on);
            if is_on {
                votes += 1;
            }
        }

        let total_inputs = group.inputs.len() as u32;
        let currently_on = self.state.group_on.get(&group_index).copied().unwrap_or(false);
        let on_threshold = (group.required_votes + group.voting_hysteresis).min(total_inputs);
        let off_threshold = group.required_votes.saturating_sub(group.voting_hysteresis);

        let next_on = if currently_on {
            votes >= off_threshold
        } else {
            votes >= on_threshold
        };
        self.state.group_on.insert(group_index, next_on);
        let _ = now;
        Ok(next_on)
    }
}

#[async_trait]
impl Block for ComparisonBlock {
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
        let mut results = Vec::with_capacity(self.config.groups.len());
        for i in 0..self.config.groups.len() {
            results.push(self.evaluate_group(i, now).await?);
        }

        let combined = match self.config.outer_operator {
            OuterOperator::And => results.iter().all(|&r| r),
            OuterOperator::Or => results.iter().any(|&r| r),
            OuterOperator::Xor => results.iter().filter(|&&r| r).count() == 1,
        };
        let output = combined ^ self.config.invert_output;

        if self.last_written != Some(output) {
            let value = if output { "1" } else { "0" };
            write_output(self.gateway.as_ref(), &self.config.output_reference, value, now, None).await?;
            self.last_written = Some(output);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value_store::mock::MockValueStore;

    fn group_with_inputs(inputs: Vec<Uuid>, required_votes: u32, voting_hysteresis: u32) -> ComparisonGroup {
        ComparisonGroup {
            inputs: inputs.into_iter().map(SourceRef::Point).collect(),
            mode: GroupMode::Analog,
            compare_type: AnalogCompareType::Higher,
            threshold1: 50.0,
            threshold2: None,
            threshold_hysteresis: 0.0,
            required_votes,
            voting_hysteresis,
            digital_value: None,
        }
    }

    #[tokio::test]
    async fn voting_hysteresis_matches_worked_scenario() {
        let inputs: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
        let output = Uuid::new_v4();
        let store = Arc::new(MockValueStore::new());
        let config = ComparisonConfig {
            id: Uuid::new_v4(),
            is_disabled: false,
            interval_seconds: 1,
            groups: vec![group_with_inputs(inputs.clone(), 2, 1)],
            outer_operator: OuterOperator::Or,
            invert_output: false,
            output_reference: SourceRef::Point(output),
        };
        let mut block = ComparisonBlock::new(config, store.clone());

        let vote_sequence = [0, 1, 2, 3, 2, 1, 0];
        let expected = ["OFF", "OFF", "OFF", "ON", "ON", "ON", "OFF"];
        for (tick, (&votes, &exp)) in vote_sequence.iter().zip(expected.iter()).enumerate() {
            for (i, &id) in inputs.iter().enumerate() {
                let value = if i < votes { "100" } else { "0" };
                store.seed_final(id, value, tick as i64);
            }
            block.execute(tick as i64).await.unwrap();
            let on = store.raw_value(output).unwrap().value == "1";
            assert_eq!(on, exp == "ON", "tick {tick}: votes={votes}");
        }
    }

    #[tokio::test]
    async fn xor_is_exactly_one_true() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let output = Uuid::new_v4();
        let store = Arc::new(MockValueStore::new());
        store.seed_final(a, "100", 0);
        store.seed_final(b, "100", 0);
        let config = ComparisonConfig {
            id: Uuid::new_v4(),
            is_disabled: false,
            interval_seconds: 1,
            groups: vec![
                group_with_inputs(vec![a], 1, 0),
                group_with_inputs(vec![b], 1, 0),
            ],
            outer_operator: OuterOperator::Xor,
            invert_output: false,
            output_reference: SourceRef::Point(output),
        };
        let mut block = ComparisonBlock::new(config, store.clone());
        block.execute(0).await.unwrap();
        // both groups ON => XOR is false
        assert_eq!(store.raw_value(output).unwrap().value, "0");
    }
}
