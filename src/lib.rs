//! marketsight: a marketplace crawler that turns the upstream's cumulative
//! order counters into daily sales deltas and period-over-period window
//! aggregates.
//!
//! The crate is layered the usual way:
//! - [`domain`] holds the entities and the pure math (delta reconstruction,
//!   window diffing) with no I/O,
//! - [`infrastructure`] holds config, logging, the SQLite stores and the
//!   marketplace HTTP client,
//! - [`application`] wires them into crawl jobs, the scheduler and the
//!   rollup engine.

pub mod application;
pub mod domain;
pub mod error;
pub mod infrastructure;

pub use error::{CrawlError, FetchError, SkipReason};
