//! Daemon entry point: loads config, opens storage, then runs scheduling
//! rounds on an interval until a shutdown signal arrives.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use marketsight::application::CrawlScheduler;
use marketsight::domain::TargetKind;
use marketsight::infrastructure::config::AppConfig;
use marketsight::infrastructure::logging::init_logging;
use marketsight::infrastructure::{
    CursorRepository, DatabaseConnection, HttpMarketplaceApi, IngestBuffer, SnapshotRepository,
};

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::var("MARKETSIGHT_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config/marketsight.json"));
    let config = AppConfig::load(&config_path).await?;
    init_logging(&config.logging)?;
    info!("marketsight {} starting", env!("CARGO_PKG_VERSION"));

    let db = DatabaseConnection::new(&config.database)
        .await
        .context("opening database")?;
    db.migrate().await.context("applying schema")?;
    let pool = db.pool().clone();
    let cursors = CursorRepository::new(pool.clone());
    let snapshots = SnapshotRepository::new(pool);

    let api = Arc::new(
        HttpMarketplaceApi::new(&config.marketplace)
            .map_err(|e| anyhow::anyhow!("building marketplace client: {e}"))?,
    );

    let (ingest, buffer) = IngestBuffer::new(
        snapshots.clone(),
        config.crawler.ingest_buffer_size,
        Duration::from_millis(config.crawler.ingest_flush_ms),
    );
    let ingest_task = tokio::spawn(buffer.run());

    let cancel = CancellationToken::new();
    let scheduler = CrawlScheduler::new(
        api,
        cursors,
        snapshots,
        ingest,
        config.crawler.clone(),
        cancel.clone(),
    );

    let mut rounds = tokio::time::interval(Duration::from_secs(config.crawler.round_interval_secs));
    loop {
        tokio::select! {
            _ = rounds.tick() => {
                if let Err(e) = scheduler.sync_root_categories().await {
                    error!("category sync failed, reusing known categories: {e}");
                }
                for kind in [TargetKind::Category, TargetKind::Seller, TargetKind::CategoryPosition] {
                    if cancel.is_cancelled() {
                        break;
                    }
                    if let Err(e) = scheduler.schedule_next_round(kind).await {
                        error!("scheduling round for {kind} failed: {e:#}");
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown requested, waiting for running jobs");
                cancel.cancel();
                break;
            }
        }
    }

    scheduler.wait_idle().await;
    // The scheduler owns the last ingest handle; dropping it lets the
    // buffer flush its tail and exit.
    drop(scheduler);
    ingest_task.await?;
    info!("shutdown complete");
    Ok(())
}
