//! Domain layer: entities plus the pure reconstruction and window math.

pub mod delta;
pub mod entities;
pub mod window;

pub use delta::{reconstruct_daily, reconstruct_range, DailyDelta};
pub use entities::{Category, CrawlTarget, PositionSnapshot, ProductSnapshot, TargetKind};
pub use window::{pct_diff, Scope, Window, WindowAggregate, WindowDiff, WindowMetrics};
