//! Core domain entities shared by the crawler and the analytics engines.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// What a crawl target points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TargetKind {
    /// Product crawl over one category's paginated listing.
    Category,
    /// Product crawl over one seller's paginated listing.
    Seller,
    /// Single-pass rank observation over a root category's listing.
    CategoryPosition,
}

impl TargetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetKind::Category => "category",
            TargetKind::Seller => "seller",
            TargetKind::CategoryPosition => "category_position",
        }
    }
}

impl std::fmt::Display for TargetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unit of crawl work with its durable pagination state.
///
/// Created the first time a category/seller id shows up in the snapshot
/// store; mutated by the owning job after every page so a crash resumes
/// from the last completed page, never from zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlTarget {
    pub kind: TargetKind,
    pub target_id: i64,
    /// Pagination offset of the next page to fetch.
    pub offset: u32,
    /// Items processed across the lifetime of this target. Compared against
    /// the upstream-reported total to short-circuit redundant rounds.
    pub items_processed: u32,
    /// Total the upstream reported on the most recent page, 0 if never seen.
    pub last_known_total: u32,
}

impl CrawlTarget {
    pub fn new(kind: TargetKind, target_id: i64) -> Self {
        Self {
            kind,
            target_id,
            offset: 0,
            items_processed: 0,
            last_known_total: 0,
        }
    }

    /// Stable identity for scheduler bookkeeping: one running job per key.
    pub fn job_key(&self) -> String {
        format!("{}:{}", self.kind, self.target_id)
    }

    /// True when the upstream previously reported a total we have already
    /// consumed, meaning a fresh page fetch would be redundant.
    pub fn is_exhausted(&self) -> bool {
        self.last_known_total > 0 && self.items_processed >= self.last_known_total
    }
}

/// One observation of one SKU at one instant.
///
/// At most one snapshot is retained per (product, sku, calendar day); a
/// same-day revisit overwrites instead of duplicating.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductSnapshot {
    pub product_id: i64,
    pub sku_id: i64,
    /// Leaf ancestor category at observation time.
    pub category_id: i64,
    pub seller_id: i64,
    pub observed_at: DateTime<Utc>,
    /// Upstream's "total orders ever placed" counter. Intended to be
    /// non-decreasing, observed to occasionally reset or jump.
    pub cumulative_order_count: i64,
    pub available_stock: i64,
    pub price: f64,
    pub full_price: Option<f64>,
    pub rating: f64,
    pub review_count: i64,
    pub title: String,
    pub photo_key: Option<String>,
}

impl ProductSnapshot {
    pub fn day(&self) -> NaiveDate {
        self.observed_at.date_naive()
    }
}

/// One observation of a SKU's rank inside a category listing.
///
/// `position` is the running item counter across pages in observed order,
/// not a server-reported rank.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionSnapshot {
    pub product_id: i64,
    pub sku_id: i64,
    pub category_id: i64,
    pub observed_at: DateTime<Utc>,
    pub position: u32,
}

/// A category known to the system, with a materialized ancestor path used
/// for subtree scope resolution ("1/24/387").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: i64,
    pub parent_id: Option<i64>,
    pub title: String,
    /// `None` until a crawl observes the category inside a category tree.
    pub path: Option<String>,
    pub product_amount: i64,
    pub adult: bool,
    pub eco: bool,
}
