//! Position crawl job: one forward pass over a category's listing.
//!
//! The rank of a SKU is the running item counter across pages in observed
//! order, not anything the server reports. Every listed item advances the
//! counter, including items with no eligible SKU (those just produce no
//! observation). No cursor: the pass is cheap and simply reruns next round.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::entities::PositionSnapshot;
use crate::error::{CrawlError, FetchError};
use crate::infrastructure::ingest_buffer::IngestHandle;
use crate::infrastructure::marketplace_client::MarketplaceApi;
use crate::infrastructure::throttle::RetryPolicy;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PositionOutcome {
    pub pages_fetched: u32,
    pub items_counted: u32,
    pub observations: u32,
    pub cancelled: bool,
}

pub struct PositionCrawlJob {
    category_id: i64,
    api: Arc<dyn MarketplaceApi>,
    ingest: IngestHandle,
    retry: RetryPolicy,
    page_size: u32,
}

impl PositionCrawlJob {
    pub fn new(
        category_id: i64,
        api: Arc<dyn MarketplaceApi>,
        ingest: IngestHandle,
        retry: RetryPolicy,
        page_size: u32,
    ) -> Self {
        Self {
            category_id,
            api,
            ingest,
            retry,
            page_size,
        }
    }

    pub async fn run(&self, cancel: CancellationToken) -> Result<PositionOutcome, CrawlError> {
        let mut outcome = PositionOutcome::default();
        let mut position = 0u32;
        let mut offset = 0u32;

        loop {
            if cancel.is_cancelled() {
                outcome.cancelled = true;
                return Ok(outcome);
            }

            let page = match self
                .retry
                .call("position page", || {
                    self.api.get_category_search(self.category_id, offset, self.page_size)
                })
                .await
            {
                Ok(page) => page,
                // A single pass does not recover offsets or escalate; it
                // just ends early and tries again next round.
                Err(FetchError::OffsetOutOfRange { .. }) => break,
                Err(err) if err.is_retryable() => {
                    warn!("category {}: position pass ended early: {err}", self.category_id);
                    break;
                }
                Err(err) => return Err(err.into()),
            };

            if page.items.is_empty() {
                break;
            }

            let observed_at = chrono::Utc::now();
            for item in &page.items {
                position += 1;
                for &sku_id in &item.sku_ids {
                    self.ingest
                        .submit(PositionSnapshot {
                            product_id: item.product_id,
                            sku_id,
                            category_id: self.category_id,
                            observed_at,
                            position,
                        })
                        .await;
                    outcome.observations += 1;
                }
            }

            outcome.items_counted += page.items.len() as u32;
            outcome.pages_fetched += 1;
            offset += page.items.len() as u32;

            if page.total <= outcome.items_counted {
                debug!("category {}: listing exhausted at {} items", self.category_id, outcome.items_counted);
                break;
            }
        }

        info!(
            "category {}: position pass done, {} items, {} observations",
            self.category_id, outcome.items_counted, outcome.observations
        );
        Ok(outcome)
    }
}
