//! Window Buffer (spec.md §4.12, §4.14, invariant 4 in §3).
//!
//! Rolling / tumbling sample windows persisted in the relational store
//! with background pruning. Two block kinds need one of these (Rate of
//! Change, Statistical); both share this trait and the
//! `max_retained(window_size)` bound so the window-bound invariant
//! (`#samples ≤ ⌈window_size × 1.2⌉`) is enforced in one place.

#[cfg(feature = "postgres")]
pub mod sqlx_buffer;

#[cfg(feature = "mock")]
pub mod mock;

use std::collections::HashMap;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::MemprocError;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowSample {
    pub timestamp: i64,
    pub value: f64,
}

/// The maximum number of samples a block's window is allowed to retain
/// at any observable moment (spec.md §3 invariant 4).
pub fn max_retained(window_size: usize) -> usize {
    ((window_size as f64) * 1.2).ceil() as usize
}

#[async_trait]
pub trait WindowBuffer: Send + Sync {
    /// Appends one sample to the block's window, keyed by block id.
    async fn push_sample(&self, block_id: Uuid, sample: WindowSample) -> Result<(), MemprocError>;

    /// Returns up to `limit` most recent samples, ordered oldest-first.
    async fn recent(&self, block_id: Uuid, limit: usize) -> Result<Vec<WindowSample>, MemprocError>;

    /// Returns the total number of samples currently retained.
    async fn count(&self, block_id: Uuid) -> Result<usize, MemprocError>;

    /// Deletes every sample for `block_id` (tumbling-window completion,
    /// or a configuration change invalidating the window per spec.md §4.12).
    async fn clear(&self, block_id: Uuid) -> Result<(), MemprocError>;

    /// Deletes all but the most recent `retain` samples for `block_id`.
    async fn prune(&self, block_id: Uuid, retain: usize) -> Result<(), MemprocError>;

    /// Deletes all but the most recent `retain` samples for each block id
    /// named in `retain_per_block`. Used by the hourly pruning task.
    async fn prune_all(&self, retain_per_block: &HashMap<Uuid, usize>) -> Result<(), MemprocError>;
}
