//! Crawl scheduling: target enumeration, the global in-flight cap and the
//! alternating-sweep fairness policy.
//!
//! One scheduling round enumerates every current target of a kind and
//! submits one job per target. A target whose job is still running from a
//! previous round is skipped, which makes the scheduler the single-writer
//! guarantee for cursors. When the in-flight cap is reached the round
//! waits cooperatively and resumes enumeration where it left off.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::domain::entities::{Category, TargetKind};
use crate::error::CrawlError;
use crate::infrastructure::config::CrawlerConfig;
use crate::infrastructure::cursor_repository::CursorRepository;
use crate::infrastructure::ingest_buffer::IngestHandle;
use crate::infrastructure::marketplace_client::{CategoryNode, MarketplaceApi};
use crate::infrastructure::snapshot_repository::SnapshotRepository;
use crate::infrastructure::throttle::{RetryPolicy, ThrottlePolicy};
use crate::application::position_job::PositionCrawlJob;
use crate::application::product_job::ProductCrawlJob;

/// Which end of the target list a round starts from. Flipped once per
/// completed round and persisted, so targets enumerated last in round N
/// are scheduled first in round N+1 and nobody starves under a tight cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepDirection {
    Down,
    Up,
}

impl SweepDirection {
    fn flipped(self) -> Self {
        match self {
            SweepDirection::Down => SweepDirection::Up,
            SweepDirection::Up => SweepDirection::Down,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            SweepDirection::Down => "down",
            SweepDirection::Up => "up",
        }
    }

    fn parse(raw: &str) -> Self {
        match raw {
            "up" => SweepDirection::Up,
            _ => SweepDirection::Down,
        }
    }
}

/// Summary of one scheduling round. `round_id` correlates the round's log
/// lines across concurrently running jobs.
#[derive(Debug, Clone)]
pub struct RoundSummary {
    pub round_id: String,
    pub submitted: Vec<String>,
    pub skipped_running: u32,
}

impl RoundSummary {
    fn new() -> Self {
        Self {
            round_id: uuid::Uuid::new_v4().to_string(),
            submitted: Vec::new(),
            skipped_running: 0,
        }
    }
}

pub struct CrawlScheduler {
    api: Arc<dyn MarketplaceApi>,
    cursors: CursorRepository,
    snapshots: SnapshotRepository,
    ingest: IngestHandle,
    config: CrawlerConfig,
    running: Arc<Mutex<HashSet<String>>>,
    cancel: CancellationToken,
}

impl CrawlScheduler {
    pub fn new(
        api: Arc<dyn MarketplaceApi>,
        cursors: CursorRepository,
        snapshots: SnapshotRepository,
        ingest: IngestHandle,
        config: CrawlerConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            api,
            cursors,
            snapshots,
            ingest,
            config,
            running: Arc::new(Mutex::new(HashSet::new())),
            cancel,
        }
    }

    /// Pull the root category tree and register every node. Failing here
    /// is systemic: without categories there is nothing to crawl.
    pub async fn sync_root_categories(&self) -> Result<usize, CrawlError> {
        let roots = self.api.get_root_categories().await?;
        let mut registered = 0usize;
        for root in &roots {
            registered += self.register_tree(root, None).await?;
        }
        info!("category sync registered {registered} categories");
        Ok(registered)
    }

    async fn register_tree(&self, node: &CategoryNode, parent_id: Option<i64>) -> Result<usize, CrawlError> {
        self.snapshots
            .register_category(&Category {
                id: node.id,
                parent_id,
                title: node.title.clone(),
                path: None,
                product_amount: node.product_amount,
                adult: node.adult,
                eco: node.eco,
            })
            .await?;
        let mut registered = 1usize;
        for child in &node.children {
            registered += Box::pin(self.register_tree(child, Some(node.id))).await?;
        }
        Ok(registered)
    }

    /// Enumerate the current targets of `kind` and submit one job per
    /// target, honoring the in-flight cap and batched release. Returns
    /// the submitted job keys in submission order.
    pub async fn schedule_next_round(&self, kind: TargetKind) -> Result<RoundSummary> {
        let mut ids = self.enumerate_targets(kind).await?;
        ids.sort_unstable();

        let sweep_key = format!("sweep:{kind}");
        let sweep = self
            .cursors
            .get_meta(&sweep_key)
            .await?
            .map(|raw| SweepDirection::parse(&raw))
            .unwrap_or(SweepDirection::Down);
        if sweep == SweepDirection::Up {
            ids.reverse();
        }

        let mut summary = RoundSummary::new();
        let mut since_cool_down = 0usize;

        for id in ids {
            if self.cancel.is_cancelled() {
                break;
            }
            let key = format!("{kind}:{id}");

            // One running job per target: a still-running job from a
            // previous round owns the cursor exclusively.
            if self.running.lock().await.contains(&key) {
                debug!("{key}: still running, skipped this round");
                summary.skipped_running += 1;
                continue;
            }

            self.wait_for_capacity().await;
            if self.cancel.is_cancelled() {
                break;
            }

            self.spawn_job(kind, id, key.clone()).await;
            summary.submitted.push(key);

            since_cool_down += 1;
            if since_cool_down >= self.config.batch_submit_size {
                since_cool_down = 0;
                tokio::time::sleep(Duration::from_millis(self.config.batch_cool_down_ms)).await;
            }
        }

        self.cursors.set_meta(&sweep_key, sweep.flipped().as_str()).await?;
        info!(
            "round {} for {kind}: {} submitted, {} skipped as running (sweep {})",
            summary.round_id,
            summary.submitted.len(),
            summary.skipped_running,
            sweep.as_str()
        );
        Ok(summary)
    }

    async fn enumerate_targets(&self, kind: TargetKind) -> Result<Vec<i64>> {
        match kind {
            TargetKind::Category => self.snapshots.category_ids_without_path().await,
            TargetKind::Seller => self.snapshots.distinct_seller_ids().await,
            TargetKind::CategoryPosition => self.snapshots.root_category_ids().await,
        }
    }

    /// Cooperative backpressure: re-check capacity on an interval instead
    /// of busy-polling or failing the round.
    async fn wait_for_capacity(&self) {
        loop {
            if self.running.lock().await.len() < self.config.max_in_flight_jobs {
                return;
            }
            if self.cancel.is_cancelled() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(self.config.capacity_poll_ms)).await;
        }
    }

    async fn spawn_job(&self, kind: TargetKind, id: i64, key: String) {
        self.running.lock().await.insert(key.clone());

        let api = Arc::clone(&self.api);
        let cursors = self.cursors.clone();
        let snapshots = self.snapshots.clone();
        let ingest = self.ingest.clone();
        let running = Arc::clone(&self.running);
        let cancel = self.cancel.child_token();
        let config = self.config.clone();

        tokio::spawn(async move {
            let result = match kind {
                TargetKind::Category | TargetKind::Seller => {
                    let job = ProductCrawlJob::new(
                        kind,
                        id,
                        api,
                        cursors,
                        snapshots,
                        ThrottlePolicy::from_config(&config),
                        RetryPolicy::from_config(&config),
                        config.page_size,
                        config.offset_recovery_step,
                    );
                    job.run(cancel).await.map(|outcome| {
                        debug!(
                            "{key}: {} items, {} snapshots, {} skipped",
                            outcome.items_processed, outcome.snapshots_written, outcome.items_skipped
                        );
                    })
                }
                TargetKind::CategoryPosition => {
                    let job = PositionCrawlJob::new(
                        id,
                        api,
                        ingest,
                        RetryPolicy::from_config(&config),
                        config.page_size,
                    );
                    job.run(cancel).await.map(|outcome| {
                        debug!("{key}: {} positions observed", outcome.observations);
                    })
                }
            };

            // Contain the failure to this job; the next round re-attempts
            // the target from its persisted cursor.
            if let Err(e) = result {
                match e {
                    CrawlError::Cancelled => warn!("{key}: cancelled"),
                    e => error!("{key}: job failed: {e}"),
                }
            }
            running.lock().await.remove(&key);
        });
    }

    pub async fn in_flight(&self) -> usize {
        self.running.lock().await.len()
    }

    /// Wait until every spawned job has finished. Used by shutdown and by
    /// tests; polling is fine at this cadence.
    pub async fn wait_idle(&self) {
        while !self.running.lock().await.is_empty() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}
