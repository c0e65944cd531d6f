//! If Block / Conditional (spec.md §4.9): ordered branches, first
//! truthy condition wins, top-down short-circuit evaluation (spec.md §9
//! Open Question: resolved as top-down, short-circuiting).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::MemprocError;
use crate::expression::ExpressionCache;
use crate::reference::SourceRef;
use crate::scheduler::Block;
use crate::value_store::ValueStoreGateway;

use super::support::write_output;

pub const MAX_BRANCHES: usize = 20;

#[derive(Debug, Clone)]
pub struct IfBranch {
    pub condition: String,
    pub value: f64,
    pub hysteresis: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IfOutputKind {
    DigitalOutput,
    AnalogOutput,
    GlobalVariableBoolean,
    GlobalVariableAnalog,
}

#[derive(Debug, Clone)]
pub struct IfConfig {
    pub id: Uuid,
    pub is_disabled: bool,
    pub interval_seconds: u64,
    pub branches: Vec<IfBranch>,
    pub default_value: f64,
    pub output_kind: IfOutputKind,
    pub output_reference: SourceRef,
    /// Alias name -> source reference, shared across all branch conditions.
    pub condition_aliases: Vec<(String, SourceRef)>,
}

pub struct IfBlock {
    config: IfConfig,
    gateway: Arc<dyn ValueStoreGateway>,
    cache: Arc<ExpressionCache>,
    /// Index of the branch selected on the previous tick, for hysteresis.
    last_selected: Option<usize>,
    last_written: Option<f64>,
}

impl IfBlock {
    pub fn new(config: IfConfig, gateway: Arc<dyn ValueStoreGateway>, cache: Arc<ExpressionCache>) -> Self {
        assert!(config.branches.len() <= MAX_BRANCHES, "If block exceeds branch limit");
        Self {
            config,
            gateway,
            cache,
            last_selected: None,
            last_written: None,
        }
    }

    async fn resolve_env(&self) -> HashMap<String, f64> {
        let mut env = HashMap::with_capacity(self.config.condition_aliases.len());
        for (alias, reference) in &self.config.condition_aliases {
            let value = match super::support::read_final(self.gateway.as_ref(), reference).await {
                Ok(Some(entry)) => entry.as_f64().unwrap_or(0.0),
                _ => 0.0,
            };
            env.insert(alias.clone(), value);
        }
        env
    }

    fn unique_condition_key(&self, branch_index: usize) -> Uuid {
        // Each branch's compiled form is cached independently, namespaced
        // off the block id so two blocks never collide.
        Uuid::new_v5(&self.config.id, branch_index.to_string().as_bytes())
    }
}

#[async_trait]
impl Block for IfBlock {
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
        let env = self.resolve_env().await;

        let mut selected: Option<usize> = None;
        for (index, branch) in self.config.branches.iter().enumerate() {
            let cache_key = self.unique_condition_key(index);
            let compiled = self.cache.get_or_compile(cache_key, &branch.condition)?;
            let mut raw = compiled.eval(&env)?;

            // A non-zero hysteresis widens the band around the branch's
            // threshold the same way Comparison's analog hysteresis does:
            // the currently-selected branch gets a bonus toward staying
            // selected so a borderline condition does not flap.
            if branch.hysteresis != 0.0 && self.last_selected == Some(index) {
                raw += branch.hysteresis.abs();
            }
            if raw.abs() > crate::expression::TRUTHY_EPSILON {
                selected = Some(index);
                break;
            }
        }

        let value = match selected {
            Some(index) => self.config.branches[index].value,
            None => self.config.default_value,
        };
        self.last_selected = selected;

        if self.last_written != Some(value) {
            let rendered = match self.config.output_kind {
                IfOutputKind::DigitalOutput | IfOutputKind::GlobalVariableBoolean => {
                    if value.abs() > 1e-10 { "1".to_string() } else { "0".to_string() }
                }
                IfOutputKind::AnalogOutput | IfOutputKind::GlobalVariableAnalog => value.to_string(),
            };
            write_output(self.gateway.as_ref(), &self.config.output_reference, &rendered, now, None).await?;
            self.last_written = Some(value);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value_store::mock::MockValueStore;

    #[tokio::test]
    async fn first_truthy_branch_wins_top_down() {
        let output = Uuid::new_v4();
        let store = Arc::new(MockValueStore::new());
        let cache = Arc::new(ExpressionCache::new());
        let config = IfConfig {
            id: Uuid::new_v4(),
            is_disabled: false,
            interval_seconds: 1,
            branches: vec![
                IfBranch { condition: "0".to_string(), value: 1.0, hysteresis: 0.0 },
                IfBranch { condition: "1".to_string(), value: 2.0, hysteresis: 0.0 },
                IfBranch { condition: "1".to_string(), value: 3.0, hysteresis: 0.0 },
            ],
            default_value: -1.0,
            output_kind: IfOutputKind::AnalogOutput,
            output_reference: SourceRef::Point(output),
            condition_aliases: vec![],
        };
        let mut block = IfBlock::new(config, store.clone(), cache);
        block.execute(1).await.unwrap();
        assert_eq!(store.raw_value(output).unwrap().value, "2");
    }

    #[tokio::test]
    async fn no_truthy_branch_falls_back_to_default() {
        let output = Uuid::new_v4();
        let store = Arc::new(MockValueStore::new());
        let cache = Arc::new(ExpressionCache::new());
        let config = IfConfig {
            id: Uuid::new_v4(),
            is_disabled: false,
            interval_seconds: 1,
            branches: vec![IfBranch { condition: "0".to_string(), value: 1.0, hysteresis: 0.0 }],
            default_value: 42.0,
            output_kind: IfOutputKind::AnalogOutput,
            output_reference: SourceRef::Point(output),
            condition_aliases: vec![],
        };
        let mut block = IfBlock::new(config, store.clone(), cache);
        block.execute(1).await.unwrap();
        assert_eq!(store.raw_value(output).unwrap().value, "42");
    }
}
