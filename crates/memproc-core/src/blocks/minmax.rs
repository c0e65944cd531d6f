//! Min/Max Selector (spec.md §4.13): extremum over multiple analog
//! inputs with configurable failover behavior when inputs drop out.

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::MemprocError;
use crate::reference::SourceRef;
use crate::scheduler::Block;
use crate::value_store::ValueStoreGateway;

use super::support::{read_final, write_output};

pub const MAX_INPUT_COUNT: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectorKind {
    Min,
    Max,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailoverMode {
    /// Fail the tick entirely if any configured input is unresolved.
    StrictSelection,
    /// Select among whichever inputs currently resolve.
    FallbackToFirstValid,
    /// If the current selection is now invalid, keep emitting the last
    /// valid value for up to `duration` seconds.
    UseLastValid,
}

#[derive(Debug, Clone)]
pub struct MinMaxConfig {
    pub id: Uuid,
    pub is_disabled: bool,
    pub interval_seconds: u64,
    pub inputs: Vec<SourceRef>,
    pub kind: SelectorKind,
    pub failover_mode: FailoverMode,
    pub hold_duration: Option<i64>,
    pub output_reference: SourceRef,
    pub selected_index_reference: Option<SourceRef>,
}

struct HeldValue {
    value: f64,
    index: usize,
    invalid_since: i64,
}

pub struct MinMaxBlock {
    config: MinMaxConfig,
    gateway: Arc<dyn ValueStoreGateway>,
    held: Option<HeldValue>,
}

impl MinMaxBlock {
    pub fn new(config: MinMaxConfig, gateway: Arc<dyn ValueStoreGateway>) -> Self {
        assert!(config.inputs.len() >= 2, "min/max selector needs at least 2 inputs");
        assert!(config.inputs.len() <= MAX_INPUT_COUNT, "min/max selector exceeds input limit");
        Self { config, gateway, held: None }
    }

    fn select(&self, candidates: &[(usize, f64)]) -> (usize, f64) {
        match self.config.kind {
            SelectorKind::Min => *candidates.iter().min_by(|a, b| a.1.partial_cmp(&b.1).unwrap()).unwrap(),
            SelectorKind::Max => *candidates.iter().max_by(|a, b| a.1.partial_cmp(&b.1).unwrap()).unwrap(),
        }
    }
}

#[async_trait]
impl Block for MinMaxBlock {
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
        let mut candidates = Vec::with_capacity(self.config.inputs.len());
        for (index, reference) in self.config.inputs.iter().enumerate() {
            let Some(entry) = read_final(self.gateway.as_ref(), reference).await? else { continue };
            let Ok(value) = entry.as_f64() else { continue };
            candidates.push((index, value));
        }

        if candidates.len() < self.config.inputs.len() && self.config.failover_mode == FailoverMode::StrictSelection {
            return Err(MemprocError::Resolve(format!(
                "min/max selector {}: not all inputs resolved under StrictSelection",
                self.config.id
            )));
        }

        let (index, value) = if candidates.is_empty() {
            match (&self.config.failover_mode, &self.held, self.config.hold_duration) {
                (FailoverMode::UseLastValid, Some(held), Some(duration)) if now - held.invalid_since < duration => {
                    (held.index, held.value)
                }
                _ => {
                    return Err(MemprocError::Resolve(format!(
                        "min/max selector {}: no inputs resolved",
                        self.config.id
                    )));
                }
            }
        } else {
            let selected = self.select(&candidates);
            if self.config.failover_mode == FailoverMode::UseLastValid {
                self.held = Some(HeldValue { value: selected.1, index: selected.0, invalid_since: now });
            }
            selected
        };

        write_output(self.gateway.as_ref(), &self.config.output_reference, &value.to_string(), now, None).await?;
        if let Some(index_ref) = &self.config.selected_index_reference {
            write_output(self.gateway.as_ref(), index_ref, &index.to_string(), now, None).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value_store::mock::MockValueStore;

    #[tokio::test]
    async fn selects_maximum_of_three() {
        let ids: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
        let output = Uuid::new_v4();
        let store = Arc::new(MockValueStore::new());
        for (i, &v) in [5.0, 50.0, 20.0].iter().enumerate() {
            store.seed_final(ids[i], v.to_string(), 0);
        }
        let config = MinMaxConfig {
            id: Uuid::new_v4(),
            is_disabled: false,
            interval_seconds: 1,
            inputs: ids.into_iter().map(SourceRef::Point).collect(),
            kind: SelectorKind::Max,
            failover_mode: FailoverMode::FallbackToFirstValid,
            hold_duration: None,
            output_reference: SourceRef::Point(output),
            selected_index_reference: None,
        };
        let mut block = MinMaxBlock::new(config, store.clone());
        block.execute(0).await.unwrap();
        assert_eq!(store.raw_value(output).unwrap().value, "50");
    }

    #[tokio::test]
    async fn use_last_valid_holds_through_a_gap() {
        let ids: Vec<Uuid> = (0..2).map(|_| Uuid::new_v4()).collect();
        let output = Uuid::new_v4();
        let store = Arc::new(MockValueStore::new());
        store.seed_final(ids[0], "10", 0);
        store.seed_final(ids[1], "20", 0);
        let config = MinMaxConfig {
            id: Uuid::new_v4(),
            is_disabled: false,
            interval_seconds: 1,
            inputs: ids.clone().into_iter().map(SourceRef::Point).collect(),
            kind: SelectorKind::Min,
            failover_mode: FailoverMode::UseLastValid,
            hold_duration: Some(10),
            output_reference: SourceRef::Point(output),
            selected_index_reference: None,
        };
        let mut block = MinMaxBlock::new(config, store.clone());
        block.execute(0).await.unwrap();
        assert_eq!(store.raw_value(output).unwrap().value, "10");

        store.drop_final(ids[0]);
        store.drop_final(ids[1]);
        block.execute(5).await.unwrap();
        assert_eq!(store.raw_value(output).unwrap().value, "10", "holds last valid within duration");

        block.execute(11).await.unwrap_err();
    }
}
