//! In-memory window buffer fake for block unit tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::MemprocError;

use super::{WindowBuffer, WindowSample};

#[derive(Default)]
pub struct MockWindowBuffer {
    samples: Mutex<HashMap<Uuid, Vec<WindowSample>>>,
}

impl MockWindowBuffer {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WindowBuffer for MockWindowBuffer {
    async fn push_sample(&self, block_id: Uuid, sample: WindowSample) -> Result<(), MemprocError> {
        self.samples.lock().unwrap().entry(block_id).or_default().push(sample);
        Ok(())
    }

    async fn recent(&self, block_id: Uuid, limit: usize) -> Result<Vec<WindowSample>, MemprocError> {
        let store = self.samples.lock().unwrap();
        let all = store.get(&block_id).cloned().unwrap_or_default();
        let start = all.len().saturating_sub(limit);
        Ok(all[start..].to_vec())
    }

    async fn count(&self, block_id: Uuid) -> Result<usize, MemprocError> {
        Ok(self.samples.lock().unwrap().get(&block_id).map(|v| v.len()).unwrap_or(0))
    }

    async fn clear(&self, block_id: Uuid) -> Result<(), MemprocError> {
        self.samples.lock().unwrap().remove(&block_id);
        Ok(())
    }

    async fn prune(&self, block_id: Uuid, retain: usize) -> Result<(), MemprocError> {
        let mut store = self.samples.lock().unwrap();
        if let Some(v) = store.get_mut(&block_id) {
            let start = v.len().saturating_sub(retain);
            v.drain(0..start);
        }
        Ok(())
    }

    async fn prune_all(&self, retain_per_block: &HashMap<Uuid, usize>) -> Result<(), MemprocError> {
        for (&block_id, &retain) in retain_per_block {
            self.prune(block_id, retain).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn retains_only_requested_window() {
        let buf = MockWindowBuffer::new();
        let id = Uuid::new_v4();
        for i in 0..10 {
            buf.push_sample(id, WindowSample { timestamp: i, value: i as f64 })
                .await
                .unwrap();
        }
        buf.prune(id, 5).await.unwrap();
        assert_eq!(buf.count(id).await.unwrap(), 5);
        let recent = buf.recent(id, 5).await.unwrap();
        assert_eq!(recent.first().unwrap().timestamp, 5);
        assert_eq!(recent.last().unwrap().timestamp, 9);
    }
}
