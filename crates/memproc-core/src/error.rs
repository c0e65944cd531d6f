//! The error taxonomy from spec.md §7.
//!
//! Mirrors the teacher's `PgCollectError`: a plain enum with a hand-written
//! `Display`/`Error` impl rather than a derive macro, so callers can match
//! on variants to decide whether a tick should skip, retry, or propagate.

use std::fmt;

/// Errors a Memory Processor block can encounter during a tick.
#[derive(Debug)]
pub enum MemprocError {
    /// Validation failure when creating/editing a block or variable.
    /// Never leaks into the processor loop; returned synchronously to the
    /// repository caller.
    Configuration(String),
    /// A referenced Point or Global Variable is missing at tick time.
    /// The block skips this tick; no state change.
    Resolve(String),
    /// An input value could not be parsed to the required type.
    /// The block skips this tick.
    Parse(String),
    /// An expression failed to evaluate. Persisted as `last_error` on the
    /// owning block row; cleared on the next successful evaluation.
    Evaluation(String),
    /// The DB or KV store is unavailable. The scheduler logs and continues;
    /// no block's persistent state is corrupted because writes are per-tick
    /// and idempotent.
    TransientStore(String),
    /// PID auto-tune relay-feedback safety limit exceeded. The session
    /// transitions to `Failed` with this reason.
    SafetyAbort(String),
}

impl fmt::Display for MemprocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration(msg) => write!(f, "configuration error: {msg}"),
            Self::Resolve(msg) => write!(f, "resolve error: {msg}"),
            Self::Parse(msg) => write!(f, "parse error: {msg}"),
            Self::Evaluation(msg) => write!(f, "evaluation error: {msg}"),
            Self::TransientStore(msg) => write!(f, "transient store error: {msg}"),
            Self::SafetyAbort(msg) => write!(f, "safety abort: {msg}"),
        }
    }
}

impl std::error::Error for MemprocError {}

impl MemprocError {
    /// Whether the scheduler should skip this tick silently (no state
    /// mutation) rather than propagate or retry.
    pub fn skips_tick(&self) -> bool {
        matches!(self, Self::Resolve(_) | Self::Parse(_))
    }
}

#[cfg(feature = "postgres")]
impl From<sqlx::Error> for MemprocError {
    fn from(e: sqlx::Error) -> Self {
        Self::TransientStore(e.to_string())
    }
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for MemprocError {
    fn from(e: redis::RedisError) -> Self {
        Self::TransientStore(e.to_string())
    }
}
