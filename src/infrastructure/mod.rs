//! Infrastructure layer: config, logging, storage and the marketplace
//! transport.

pub mod config;
pub mod cursor_repository;
pub mod database_connection;
pub mod ingest_buffer;
pub mod logging;
pub mod marketplace_client;
pub mod snapshot_repository;
pub mod throttle;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::AppConfig;
pub use cursor_repository::CursorRepository;
pub use database_connection::DatabaseConnection;
pub use ingest_buffer::{IngestBuffer, IngestHandle};
pub use marketplace_client::{HttpMarketplaceApi, MarketplaceApi};
pub use snapshot_repository::{PositionPoint, SkuRef, SnapshotRepository};
pub use throttle::{RetryPolicy, ThrottlePolicy};
