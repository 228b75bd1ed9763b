//! Product crawl job for one category or seller target.
//!
//! Drives the pagination state machine:
//! fetch page → (empty → done) → per-item detail fetch (skip on error) →
//! accumulate → persist page → advance cursor → fetch page.
//!
//! The cursor is persisted after every page so a crash resumes from the
//! last completed page. A transient error on one item's detail is logged
//! and skipped; it never aborts the page or the job.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::entities::{CrawlTarget, ProductSnapshot, TargetKind};
use crate::error::{CrawlError, FetchError, SkipReason};
use crate::infrastructure::cursor_repository::CursorRepository;
use crate::infrastructure::marketplace_client::{MarketplaceApi, SearchItem, SearchPage};
use crate::infrastructure::snapshot_repository::SnapshotRepository;
use crate::infrastructure::throttle::{RetryPolicy, ThrottlePolicy};

/// What one job run accomplished.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobOutcome {
    pub pages_fetched: u32,
    pub items_processed: u32,
    pub items_skipped: u32,
    pub snapshots_written: u32,
    pub cancelled: bool,
}

/// Dependencies are injected at construction; the job performs no runtime
/// registry lookups.
pub struct ProductCrawlJob {
    kind: TargetKind,
    target_id: i64,
    api: Arc<dyn MarketplaceApi>,
    cursors: CursorRepository,
    snapshots: SnapshotRepository,
    throttle: ThrottlePolicy,
    retry: RetryPolicy,
    page_size: u32,
    offset_recovery_step: u32,
}

/// Consecutive offset recoveries tolerated before the job gives up on the
/// moving-target listing for this round.
const MAX_OFFSET_RECOVERIES: u32 = 5;

impl ProductCrawlJob {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        kind: TargetKind,
        target_id: i64,
        api: Arc<dyn MarketplaceApi>,
        cursors: CursorRepository,
        snapshots: SnapshotRepository,
        throttle: ThrottlePolicy,
        retry: RetryPolicy,
        page_size: u32,
        offset_recovery_step: u32,
    ) -> Self {
        debug_assert!(matches!(kind, TargetKind::Category | TargetKind::Seller));
        Self {
            kind,
            target_id,
            api,
            cursors,
            snapshots,
            throttle,
            retry,
            page_size,
            offset_recovery_step,
        }
    }

    pub async fn run(&self, cancel: CancellationToken) -> Result<JobOutcome, CrawlError> {
        let mut target = self.cursors.load_or_create(self.kind, self.target_id).await?;
        let mut outcome = JobOutcome::default();

        // Short-circuit before any fetch when the previously reported
        // total is already consumed.
        if target.is_exhausted() {
            debug!(
                "{}: total {} already processed, nothing new",
                target.job_key(),
                target.last_known_total
            );
            return Ok(outcome);
        }

        let mut offset_recoveries = 0u32;
        loop {
            if cancel.is_cancelled() {
                self.cursors.save(&target).await?;
                outcome.cancelled = true;
                info!("{}: cancelled, cursor flushed at offset {}", target.job_key(), target.offset);
                return Ok(outcome);
            }

            let page = match self.fetch_page(&target).await {
                Ok(page) => page,
                Err(FetchError::OffsetOutOfRange { offset }) => {
                    // Upstream pagination is a moving target; nudge the
                    // cursor forward and try again instead of failing.
                    offset_recoveries += 1;
                    if offset_recoveries > MAX_OFFSET_RECOVERIES {
                        warn!("{}: offset {} still rejected, ending round", target.job_key(), offset);
                        break;
                    }
                    target.offset = offset.saturating_add(self.offset_recovery_step);
                    self.cursors.save(&target).await?;
                    continue;
                }
                Err(err) => {
                    self.cursors.save(&target).await?;
                    return Err(err.into());
                }
            };
            offset_recoveries = 0;

            if page.items.is_empty() {
                debug!("{}: empty page at offset {}, done", target.job_key(), target.offset);
                break;
            }

            self.snapshots.upsert_category_tree(&page.category_tree).await?;

            let mut batch: Vec<ProductSnapshot> = Vec::new();
            for item in &page.items {
                // Mandatory inter-item throttle, never skipped.
                self.throttle.pause().await;
                match self.fetch_item(item).await {
                    Ok(snapshots) => batch.extend(snapshots),
                    Err(reason) => {
                        warn!("{}: skipping product {}: {reason}", target.job_key(), item.product_id);
                        outcome.items_skipped += 1;
                    }
                }
            }

            self.snapshots.upsert_product_snapshots(&batch).await?;
            outcome.snapshots_written += batch.len() as u32;
            outcome.items_processed += page.items.len() as u32;
            outcome.pages_fetched += 1;

            target.offset += page.items.len() as u32;
            target.items_processed += page.items.len() as u32;
            target.last_known_total = page.total;
            self.cursors.save(&target).await?;

            if target.is_exhausted() {
                break;
            }
        }

        self.cursors.save(&target).await?;
        info!(
            "{}: round done, {} pages, {} items, {} snapshots, {} skipped",
            target.job_key(),
            outcome.pages_fetched,
            outcome.items_processed,
            outcome.snapshots_written,
            outcome.items_skipped
        );
        Ok(outcome)
    }

    async fn fetch_page(&self, target: &CrawlTarget) -> Result<SearchPage, FetchError> {
        let (offset, limit) = (target.offset, self.page_size);
        match self.kind {
            TargetKind::Category => {
                self.retry
                    .call("category search", || {
                        self.api.get_category_search(self.target_id, offset, limit)
                    })
                    .await
            }
            _ => {
                self.retry
                    .call("seller search", || {
                        self.api.get_seller_search(self.target_id, offset, limit)
                    })
                    .await
            }
        }
    }

    /// Fetch one item's detail and expand it into per-SKU snapshots.
    /// Failures come back as values so the caller can filter, not unwind.
    async fn fetch_item(&self, item: &SearchItem) -> Result<Vec<ProductSnapshot>, SkipReason> {
        let detail = self
            .retry
            .call("product detail", || self.api.get_product_detail(item.product_id))
            .await
            .map_err(|e| SkipReason::DetailUnavailable(e.to_string()))?;

        if detail.sku_list.is_empty() {
            return Err(SkipReason::NoEligibleSku);
        }

        let category_id = match detail.category_path.last() {
            Some(&leaf) => leaf,
            None if self.kind == TargetKind::Category => self.target_id,
            None => return Err(SkipReason::MissingField("category_path")),
        };

        let observed_at = chrono::Utc::now();
        Ok(detail
            .sku_list
            .iter()
            .map(|sku| ProductSnapshot {
                product_id: detail.product_id,
                sku_id: sku.sku_id,
                category_id,
                seller_id: detail.seller.id,
                observed_at,
                cumulative_order_count: sku.order_count,
                available_stock: sku.available_amount,
                price: sku.purchase_price,
                full_price: sku.full_price,
                rating: detail.rating,
                review_count: detail.review_count,
                title: detail.title.clone(),
                photo_key: sku.photo_key.clone(),
            })
            .collect())
    }
}
