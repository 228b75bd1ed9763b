//! Application layer: crawl jobs, the scheduler that runs them and the
//! rollup engine that turns stored snapshots into window aggregates.

pub mod position_job;
pub mod product_job;
pub mod rollup;
pub mod scheduler;

pub use position_job::{PositionCrawlJob, PositionOutcome};
pub use product_job::{JobOutcome, ProductCrawlJob};
pub use rollup::RollupEngine;
pub use scheduler::{CrawlScheduler, RoundSummary};
