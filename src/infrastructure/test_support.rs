//! Shared fixtures for unit tests: an in-memory mock marketplace and a
//! throwaway SQLite store.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::{tempdir, TempDir};

use crate::error::FetchError;
use crate::infrastructure::config::DatabaseConfig;
use crate::infrastructure::cursor_repository::CursorRepository;
use crate::infrastructure::database_connection::DatabaseConnection;
use crate::infrastructure::marketplace_client::{
    CategoryNode, CategoryTreeNode, MarketplaceApi, ProductDetailResponse, SearchItem, SearchPage,
    SellerInfo, SkuDetail,
};
use crate::infrastructure::snapshot_repository::SnapshotRepository;

/// Fresh on-disk SQLite store with the schema applied. The `TempDir` must
/// stay alive for the duration of the test.
pub(crate) async fn stores() -> (TempDir, CursorRepository, SnapshotRepository) {
    let dir = tempdir().unwrap();
    let config = DatabaseConfig {
        url: format!("sqlite:{}", dir.path().join("test.db").display()),
        max_connections: 4,
    };
    let db = DatabaseConnection::new(&config).await.unwrap();
    db.migrate().await.unwrap();
    let pool = db.pool().clone();
    (
        dir,
        CursorRepository::new(pool.clone()),
        SnapshotRepository::new(pool),
    )
}

/// Scriptable in-memory marketplace. Every product gets one SKU
/// (`sku_id = product_id * 10`) with a configurable order counter.
pub(crate) struct MockMarketplace {
    roots: Mutex<Vec<CategoryNode>>,
    category_listings: Mutex<HashMap<i64, Vec<i64>>>,
    seller_listings: Mutex<HashMap<i64, Vec<i64>>>,
    order_counts: Mutex<HashMap<i64, i64>>,
    failing_details: Mutex<HashSet<i64>>,
    min_valid_offset: AtomicU32,
    search_fails_fatally: Mutex<bool>,
    search_delay_ms: AtomicI64,
    search_calls: AtomicU32,
    detail_calls: AtomicU32,
    concurrent_searches: AtomicI64,
    max_concurrent_searches: AtomicI64,
    default_seller: i64,
}

impl MockMarketplace {
    pub fn new() -> Self {
        Self {
            roots: Mutex::new(Vec::new()),
            category_listings: Mutex::new(HashMap::new()),
            seller_listings: Mutex::new(HashMap::new()),
            order_counts: Mutex::new(HashMap::new()),
            failing_details: Mutex::new(HashSet::new()),
            min_valid_offset: AtomicU32::new(0),
            search_fails_fatally: Mutex::new(false),
            search_delay_ms: AtomicI64::new(0),
            search_calls: AtomicU32::new(0),
            detail_calls: AtomicU32::new(0),
            concurrent_searches: AtomicI64::new(0),
            max_concurrent_searches: AtomicI64::new(0),
            default_seller: 300,
        }
    }

    pub fn with_category(category_id: i64, product_ids: Vec<i64>) -> Self {
        let mock = Self::new();
        mock.add_category(category_id, product_ids);
        mock
    }

    pub fn with_seller(seller_id: i64, product_ids: Vec<i64>) -> Self {
        let mock = Self::new();
        mock.seller_listings.lock().unwrap().insert(seller_id, product_ids);
        mock
    }

    pub fn add_category(&self, category_id: i64, product_ids: Vec<i64>) {
        self.category_listings.lock().unwrap().insert(category_id, product_ids);
    }

    pub fn set_roots(&self, roots: Vec<CategoryNode>) {
        *self.roots.lock().unwrap() = roots;
    }

    pub fn set_order_count(&self, product_id: i64, count: i64) {
        self.order_counts.lock().unwrap().insert(product_id, count);
    }

    pub fn fail_detail(&self, product_id: i64) {
        self.failing_details.lock().unwrap().insert(product_id);
    }

    pub fn reject_offsets_below(&self, min: u32) {
        self.min_valid_offset.store(min, Ordering::SeqCst);
    }

    pub fn fail_search_fatally(&self) {
        *self.search_fails_fatally.lock().unwrap() = true;
    }

    pub fn set_search_delay(&self, delay: Duration) {
        self.search_delay_ms.store(delay.as_millis() as i64, Ordering::SeqCst);
    }

    pub fn search_calls(&self) -> u32 {
        self.search_calls.load(Ordering::SeqCst)
    }

    pub fn detail_calls(&self) -> u32 {
        self.detail_calls.load(Ordering::SeqCst)
    }

    pub fn max_concurrent_searches(&self) -> i64 {
        self.max_concurrent_searches.load(Ordering::SeqCst)
    }

    async fn search(&self, listing: Option<Vec<i64>>, offset: u32, limit: u32) -> Result<SearchPage, FetchError> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        let now = self.concurrent_searches.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_concurrent_searches.fetch_max(now, Ordering::SeqCst);

        let delay = self.search_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay as u64)).await;
        }
        self.concurrent_searches.fetch_sub(1, Ordering::SeqCst);

        if *self.search_fails_fatally.lock().unwrap() {
            return Err(FetchError::Fatal("auth rejected".into()));
        }
        let min = self.min_valid_offset.load(Ordering::SeqCst);
        if offset < min {
            return Err(FetchError::OffsetOutOfRange { offset });
        }

        let all = listing.unwrap_or_default();
        let items: Vec<SearchItem> = all
            .iter()
            .skip(offset.saturating_sub(min) as usize)
            .take(limit as usize)
            .map(|&product_id| SearchItem {
                product_id,
                sku_ids: vec![product_id * 10],
                characteristics: Vec::new(),
            })
            .collect();

        Ok(SearchPage {
            items,
            total: all.len() as u32,
            category_tree: Vec::new(),
            errors: Vec::new(),
        })
    }
}

#[async_trait]
impl MarketplaceApi for MockMarketplace {
    async fn get_root_categories(&self) -> Result<Vec<CategoryNode>, FetchError> {
        Ok(self.roots.lock().unwrap().clone())
    }

    async fn get_category_search(
        &self,
        category_id: i64,
        offset: u32,
        limit: u32,
    ) -> Result<SearchPage, FetchError> {
        let listing = self.category_listings.lock().unwrap().get(&category_id).cloned();
        let mut page = self.search(listing, offset, limit).await?;
        // Real responses carry the ancestor chain of the searched category.
        page.category_tree = vec![
            CategoryTreeNode { id: 1, parent_id: None, title: "root".into() },
            CategoryTreeNode { id: category_id, parent_id: Some(1), title: format!("cat-{category_id}") },
        ];
        if category_id == 1 {
            page.category_tree.truncate(1);
        }
        Ok(page)
    }

    async fn get_seller_search(
        &self,
        seller_id: i64,
        offset: u32,
        limit: u32,
    ) -> Result<SearchPage, FetchError> {
        let listing = self.seller_listings.lock().unwrap().get(&seller_id).cloned();
        self.search(listing, offset, limit).await
    }

    async fn get_product_detail(&self, product_id: i64) -> Result<ProductDetailResponse, FetchError> {
        self.detail_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing_details.lock().unwrap().contains(&product_id) {
            return Err(FetchError::Transient("detail timed out".into()));
        }

        let seller_id = self
            .seller_listings
            .lock()
            .unwrap()
            .iter()
            .find(|(_, products)| products.contains(&product_id))
            .map(|(&seller, _)| seller)
            .unwrap_or(self.default_seller);
        let category_path = self
            .category_listings
            .lock()
            .unwrap()
            .iter()
            .find(|(_, products)| products.contains(&product_id))
            .map(|(&category, _)| if category == 1 { vec![1] } else { vec![1, category] })
            .unwrap_or_else(|| vec![1, 77]);
        let order_count = self
            .order_counts
            .lock()
            .unwrap()
            .get(&product_id)
            .copied()
            .unwrap_or(product_id);

        Ok(ProductDetailResponse {
            product_id,
            sku_list: vec![SkuDetail {
                sku_id: product_id * 10,
                available_amount: 5,
                order_count,
                purchase_price: 19.9,
                full_price: Some(24.9),
                characteristics: Vec::new(),
                photo_key: Some(format!("photo/{product_id}")),
            }],
            rating: 4.5,
            review_count: 7,
            title: format!("product {product_id}"),
            seller: SellerInfo { id: seller_id, title: format!("seller {seller_id}") },
            category_path,
        })
    }
}
