//! Block Scheduler (spec.md §4.1, §5).
//!
//! Every one second, for each enabled block, checks whether its interval
//! has elapsed since `last_executed` and if so runs it. A block's failure
//! is logged and never stalls the others. Different block-type loops run
//! as independent tasks (see `memprocd`); within one loop, blocks run
//! sequentially, left-to-right, and the `last_executed` map is owned
//! exclusively by that loop.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::sleep;
use uuid::Uuid;

use crate::error::MemprocError;

/// One kind of Memory Processor block, driven one tick at a time.
#[async_trait]
pub trait Block: Send {
    fn id(&self) -> Uuid;
    fn interval_seconds(&self) -> u64;
    fn is_disabled(&self) -> bool;

    /// Runs one execution of the block's algorithm. `now` is unix seconds.
    async fn execute(&mut self, now: i64) -> Result<(), MemprocError>;
}

/// Drives a homogeneous set of blocks of one kind against the shared
/// one-second tick.
pub struct BlockScheduler<B: Block> {
    blocks: Vec<B>,
    last_executed: HashMap<Uuid, i64>,
    block_kind: &'static str,
}

impl<B: Block> BlockScheduler<B> {
    pub fn new(block_kind: &'static str, blocks: Vec<B>) -> Self {
        Self {
            blocks,
            last_executed: HashMap::new(),
            block_kind,
        }
    }

    pub fn blocks_mut(&mut self) -> &mut Vec<B> {
        &mut self.blocks
    }

    /// Runs every enabled, due block once. Disabled blocks are skipped
    /// entirely: no read, no write, no state mutation, and no
    /// `last_executed` update, so a newly re-enabled block runs
    /// immediately on its next due tick.
    pub async fn tick_once(&mut self, now: i64) {
        for block in &mut self.blocks {
            if block.is_disabled() {
                continue;
            }
            let id = block.id();
            let due = match self.last_executed.get(&id) {
                Some(&last) => now - last >= block.interval_seconds().max(1) as i64,
                None => true,
            };
            if !due {
                continue;
            }

            match block.execute(now).await {
                Ok(()) => {
                    tracing::debug!(kind = self.block_kind, block_id = %id, "block tick ok");
                }
                Err(err) => {
                    tracing::warn!(kind = self.block_kind, block_id = %id, %err, "block tick failed");
                }
            }
            // Cadence is enforced from the moment the block was selected,
            // regardless of whether it succeeded: a permanently failing
            // block must not be retried every second.
            self.last_executed.insert(id, now);
        }
    }

    /// Runs the one-second tick loop until the process exits. After each
    /// full pass across the enabled set, sleeps one second before the
    /// next tick (spec.md §5 suspension points).
    pub async fn run(mut self, mut now_fn: impl FnMut() -> i64 + Send) {
        loop {
            let now = now_fn();
            self.tick_once(now).await;
            sleep(Duration::from_secs(1)).await;
        }
    }
}

/// Blocks on a DB-readiness probe at process start: up to `max_attempts`
/// tries, `interval` apart (spec.md §4.1, §5: 30 attempts, 2s).
pub async fn wait_for_db_ready<F, Fut, E>(
    mut probe: F,
    max_attempts: u32,
    interval: Duration,
) -> Result<(), E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<(), E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match probe().await {
            Ok(()) => return Ok(()),
            Err(err) => {
                if attempt >= max_attempts {
                    return Err(err);
                }
                tracing::warn!(attempt, max_attempts, %err, "database not ready yet, retrying");
                sleep(interval).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingBlock {
        id: Uuid,
        interval: u64,
        disabled: bool,
        executions: Arc<AtomicUsize>,
        fail: bool,
    }

    #[async_trait]
    impl Block for CountingBlock {
        fn id(&self) -> Uuid {
            self.id
        }
        fn interval_seconds(&self) -> u64 {
            self.interval
        }
        fn is_disabled(&self) -> bool {
            self.disabled
        }
        async fn execute(&mut self, _now: i64) -> Result<(), MemprocError> {
            self.executions.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(MemprocError::TransientStore("boom".into()));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn disabled_blocks_never_execute() {
        let executions = Arc::new(AtomicUsize::new(0));
        let block = CountingBlock {
            id: Uuid::new_v4(),
            interval: 1,
            disabled: true,
            executions: executions.clone(),
            fail: false,
        };
        let mut scheduler = BlockScheduler::new("test", vec![block]);
        for t in 0..5 {
            scheduler.tick_once(t).await;
        }
        assert_eq!(executions.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn respects_interval_cadence() {
        let executions = Arc::new(AtomicUsize::new(0));
        let block = CountingBlock {
            id: Uuid::new_v4(),
            interval: 3,
            disabled: false,
            executions: executions.clone(),
            fail: false,
        };
        let mut scheduler = BlockScheduler::new("test", vec![block]);
        for t in 0..10 {
            scheduler.tick_once(t).await;
        }
        // due at t=0,3,6,9 => 4 executions
        assert_eq!(executions.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn a_failing_block_does_not_stall_others() {
        let exec_a = Arc::new(AtomicUsize::new(0));
        let exec_b = Arc::new(AtomicUsize::new(0));
        let failing = CountingBlock {
            id: Uuid::new_v4(),
            interval: 1,
            disabled: false,
            executions: exec_a.clone(),
            fail: true,
        };
        let healthy = CountingBlock {
            id: Uuid::new_v4(),
            interval: 1,
            disabled: false,
            executions: exec_b.clone(),
            fail: false,
        };
        let mut scheduler = BlockScheduler::new("test", vec![failing, healthy]);
        scheduler.tick_once(0).await;
        scheduler.tick_once(1).await;
        assert_eq!(exec_a.load(Ordering::SeqCst), 2);
        assert_eq!(exec_b.load(Ordering::SeqCst), 2);
    }
}
