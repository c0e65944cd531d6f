//! The twelve Memory Processor block kinds (spec.md §4.5-§4.16).
//!
//! Each submodule owns one kind's configuration, loop-carried state, and
//! `Block` trait implementation; `memprocd` wires one `BlockScheduler`
//! per kind against its own repository and the shared Value Store.

pub mod support;

pub mod average;
pub mod comparison;
pub mod deadband;
pub mod formula;
pub mod if_block;
pub mod minmax;
pub mod pid_autotune;
pub mod rate_of_change;
pub mod statistical;
pub mod timeout;
pub mod totalizer;
pub mod write_action;
