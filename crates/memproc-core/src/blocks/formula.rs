//! Formula Block (spec.md §4.8): evaluates a cached compiled expression
//! against named alias inputs.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::MemprocError;
use crate::expression::ExpressionCache;
use crate::reference::SourceRef;
use crate::scheduler::Block;
use crate::value_store::ValueStoreGateway;

use super::support::{read_final, round_to, write_output};

#[derive(Debug, Clone)]
pub struct FormulaConfig {
    pub id: Uuid,
    pub is_disabled: bool,
    pub interval_seconds: u64,
    pub expression: String,
    /// Alias name -> source reference, e.g. `x -> @GV:V1`.
    pub aliases: Vec<(String, SourceRef)>,
    pub decimal_places: u32,
    pub output_reference: SourceRef,
}

pub struct FormulaBlock {
    config: FormulaConfig,
    gateway: Arc<dyn ValueStoreGateway>,
    cache: Arc<ExpressionCache>,
    pub last_error: Option<String>,
}

impl FormulaBlock {
    pub fn new(config: FormulaConfig, gateway: Arc<dyn ValueStoreGateway>, cache: Arc<ExpressionCache>) -> Self {
        Self {
            config,
            gateway,
            cache,
            last_error: None,
        }
    }

    async fn resolve_env(&self, now: i64) -> HashMap<String, f64> {
        let mut env = HashMap::with_capacity(self.config.aliases.len());
        for (alias, reference) in &self.config.aliases {
            let resolved = match read_final(self.gateway.as_ref(), reference).await {
                Ok(Some(entry)) => entry.as_f64().unwrap_or_else(|_| {
                    tracing::warn!(block_id = %self.config.id, alias, "formula alias value unparsable, using 0");
                    0.0
                }),
                Ok(None) => {
                    tracing::warn!(block_id = %self.config.id, alias, "formula alias unresolved, using 0");
                    0.0
                }
                Err(err) => {
                    tracing::warn!(block_id = %self.config.id, alias, %err, "formula alias read failed, using 0");
                    0.0
                }
            };
            env.insert(alias.clone(), resolved);
        }
        let _ = now;
        env
    }
}

#[async_trait]
impl Block for FormulaBlock {
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
        let env = self.resolve_env(now).await;

        let compiled = match self.cache.get_or_compile(self.config.id, &self.config.expression) {
            Ok(c) => c,
            Err(err) => {
                self.cache.evict(self.config.id);
                self.last_error = Some(err.to_string());
                return Err(err);
            }
        };

        match compiled.eval(&env) {
            Ok(value) => {
                self.last_error = None;
                let rounded = round_to(value, self.config.decimal_places);
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
            Err(err) => {
                self.cache.evict(self.config.id);
                self.last_error = Some(err.to_string());
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value_store::mock::MockValueStore;

    #[tokio::test]
    async fn edited_expression_invalidates_cache_per_worked_scenario() {
        let x = Uuid::new_v4();
        let output = Uuid::new_v4();
        let store = Arc::new(MockValueStore::new());
        store.seed_final(x, "10", 0);
        let cache = Arc::new(ExpressionCache::new());
        let block_id = Uuid::new_v4();

        let mut config = FormulaConfig {
            id: block_id,
            is_disabled: false,
            interval_seconds: 1,
            expression: "x + 1".to_string(),
            aliases: vec![("x".to_string(), SourceRef::Point(x))],
            decimal_places: 0,
            output_reference: SourceRef::Point(output),
        };
        let mut block = FormulaBlock::new(config.clone(), store.clone(), cache.clone());
        block.execute(1).await.unwrap();
        assert_eq!(store.raw_value(output).unwrap().value, "11");

        config.expression = "x + 2".to_string();
        let mut block2 = FormulaBlock::new(config, store.clone(), cache.clone());
        block2.execute(2).await.unwrap();
        assert_eq!(store.raw_value(output).unwrap().value, "12");
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn missing_alias_resolves_to_zero_with_no_hard_error() {
        let output = Uuid::new_v4();
        let store = Arc::new(MockValueStore::new());
        let cache = Arc::new(ExpressionCache::new());
        let config = FormulaConfig {
            id: Uuid::new_v4(),
            is_disabled: false,
            interval_seconds: 1,
            expression: "x + 5".to_string(),
            aliases: vec![("x".to_string(), SourceRef::Point(Uuid::new_v4()))],
            decimal_places: 0,
            output_reference: SourceRef::Point(output),
        };
        let mut block = FormulaBlock::new(config, store.clone(), cache);
        block.execute(1).await.unwrap();
        assert_eq!(store.raw_value(output).unwrap().value, "5");
    }
}
