//! Core algorithms and persistence traits for the Memory Processor: the
//! twelve block kinds, the expression engine, the Value Store Gateway,
//! the Source Reference Resolver, and the Global Variable Service.
//!
//! `memprocd` wires these against Postgres/Redis and drives them from
//! one long-lived task per block kind.

pub mod blocks;
pub mod boolean_parse;
pub mod cron_driver;
pub mod error;
pub mod expression;
pub mod global_variable;
pub mod reference;
pub mod scheduler;
pub mod value_store;
pub mod window;

pub use error::MemprocError;
