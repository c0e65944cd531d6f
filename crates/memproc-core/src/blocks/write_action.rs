//! Write-Action Block (spec.md §4.15): scriptable output write, static
//! or sourced from another item, with an execution-count cap.

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::MemprocError;
use crate::reference::SourceRef;
use crate::scheduler::Block;
use crate::value_store::ValueStoreGateway;

use super::support::{read_final, write_output};

#[derive(Debug, Clone)]
pub enum WriteActionSource {
    Static(String),
    Dynamic(SourceRef),
}

#[derive(Debug, Clone)]
pub struct WriteActionConfig {
    pub id: Uuid,
    pub is_disabled: bool,
    pub interval_seconds: u64,
    pub source: WriteActionSource,
    pub output_reference: SourceRef,
    pub duration: Option<i64>,
    pub max_execution_count: Option<u64>,
}

pub struct WriteActionBlock {
    config: WriteActionConfig,
    gateway: Arc<dyn ValueStoreGateway>,
    pub execution_count: u64,
}

impl WriteActionBlock {
    pub fn new(config: WriteActionConfig, gateway: Arc<dyn ValueStoreGateway>, execution_count: u64) -> Self {
        Self { config, gateway, execution_count }
    }
}

#[async_trait]
impl Block for WriteActionBlock {
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
        if let Some(max) = self.config.max_execution_count
            && self.execution_count >= max
        {
            return Ok(());
        }

        let value = match &self.config.source {
            WriteActionSource::Static(value) => value.clone(),
            WriteActionSource::Dynamic(reference) => {
                let entry = read_final(self.gateway.as_ref(), reference).await?.ok_or_else(|| {
                    MemprocError::Resolve(format!("write-action block {}: source unresolved", self.config.id))
                })?;
                entry.value
            }
        };

        write_output(self.gateway.as_ref(), &self.config.output_reference, &value, now, self.config.duration).await?;
        self.execution_count += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value_store::mock::MockValueStore;

    #[tokio::test]
    async fn stops_writing_once_max_execution_count_reached() {
        let output = Uuid::new_v4();
        let store = Arc::new(MockValueStore::new());
        let config = WriteActionConfig {
            id: Uuid::new_v4(),
            is_disabled: false,
            interval_seconds: 1,
            source: WriteActionSource::Static("1".to_string()),
            output_reference: SourceRef::Point(output),
            duration: None,
            max_execution_count: Some(2),
        };
        let mut block = WriteActionBlock::new(config, store.clone(), 0);

        for t in 0..5 {
            block.execute(t).await.unwrap();
        }
        assert_eq!(store.write_count(output), 2);
        assert_eq!(block.execution_count, 2);
    }

    #[tokio::test]
    async fn dynamic_source_copies_current_value() {
        let source = Uuid::new_v4();
        let output = Uuid::new_v4();
        let store = Arc::new(MockValueStore::new());
        store.seed_final(source, "77", 0);
        let config = WriteActionConfig {
            id: Uuid::new_v4(),
            is_disabled: false,
            interval_seconds: 1,
            source: WriteActionSource::Dynamic(SourceRef::Point(source)),
            output_reference: SourceRef::Point(output),
            duration: None,
            max_execution_count: None,
        };
        let mut block = WriteActionBlock::new(config, store.clone(), 0);
        block.execute(0).await.unwrap();
        assert_eq!(store.raw_value(output).unwrap().value, "77");
    }
}
