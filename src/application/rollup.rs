//! Window rollups: period-over-period sales aggregates for a category
//! subtree or a seller, computed from reconstructed daily deltas.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::NaiveDate;
use futures::future::join_all;
use tracing::{debug, warn};

use crate::domain::window::{Scope, Window, WindowAggregate, WindowMetrics};
use crate::infrastructure::config::WindowConfig;
use crate::infrastructure::snapshot_repository::{SkuRef, SnapshotRepository};

/// Computes [`WindowAggregate`]s on demand and memoizes them for a
/// configurable TTL. Aggregates are replaced wholesale on recomputation;
/// a cached value is never mutated.
pub struct RollupEngine {
    snapshots: SnapshotRepository,
    config: WindowConfig,
    cache: Mutex<HashMap<(Scope, Window), CacheEntry>>,
}

struct CacheEntry {
    computed_at: Instant,
    aggregate: WindowAggregate,
}

impl RollupEngine {
    pub fn new(snapshots: SnapshotRepository, config: WindowConfig) -> Self {
        Self {
            snapshots,
            config,
            cache: Mutex::new(HashMap::new()),
        }
    }

    fn days(&self, window: Window) -> i64 {
        match window {
            Window::Week => self.config.week_days,
            Window::TwoWeek => self.config.two_week_days,
            Window::Month => self.config.month_days,
            Window::TwoMonth => self.config.two_month_days,
        }
    }

    /// Rollup for one (scope, window) as of `today`. Returns `None` when the
    /// scope has no observed SKU at all, so callers can report "no data"
    /// instead of a wall of zeros.
    pub async fn compute_window(
        &self,
        scope: Scope,
        window: Window,
        today: NaiveDate,
    ) -> Result<Option<WindowAggregate>> {
        let ttl = Duration::from_secs(self.config.cache_ttl_secs);
        if let Some(entry) = self.cache.lock().unwrap().get(&(scope, window)) {
            if entry.computed_at.elapsed() < ttl {
                debug!("rollup cache hit for {scope:?}/{}", window.as_str());
                return Ok(Some(entry.aggregate.clone()));
            }
        }

        let days = self.days(window);
        // The current period ends today; the previous period is the
        // immediately preceding span of equal length.
        let current_from = today - chrono::Duration::days(days - 1);
        let previous_to = current_from - chrono::Duration::days(1);
        let previous_from = previous_to - chrono::Duration::days(days - 1);

        let skus = self.scope_skus(scope, previous_from).await?;
        if skus.is_empty() {
            return Ok(None);
        }

        let mut current = PeriodAccumulator::new(previous_to + chrono::Duration::days(1), today);
        let mut previous = PeriodAccumulator::new(previous_from, previous_to);

        for sku in &skus {
            let Some(deltas) = self
                .snapshots
                .daily_deltas(sku.product_id, sku.sku_id, previous_from, today)
                .await?
            else {
                continue;
            };
            current.add_sku(sku, &deltas);
            previous.add_sku(sku, &deltas);
        }

        let aggregate = WindowAggregate::new(scope, window, current.finish(), previous.finish());
        self.cache.lock().unwrap().insert(
            (scope, window),
            CacheEntry {
                computed_at: Instant::now(),
                aggregate: aggregate.clone(),
            },
        );
        Ok(Some(aggregate))
    }

    /// Rollups for many scopes of one window, computed concurrently. A
    /// failing scope is logged and dropped; it never poisons the batch.
    pub async fn compute_many(
        &self,
        scopes: &[Scope],
        window: Window,
        today: NaiveDate,
    ) -> Vec<WindowAggregate> {
        let tasks = scopes
            .iter()
            .map(|&scope| async move {
                match self.compute_window(scope, window, today).await {
                    Ok(aggregate) => aggregate,
                    Err(e) => {
                        warn!("rollup failed for {scope:?}: {e:#}");
                        None
                    }
                }
            })
            .collect::<Vec<_>>();
        join_all(tasks).await.into_iter().flatten().collect()
    }

    pub fn invalidate(&self) {
        self.cache.lock().unwrap().clear();
    }

    /// SKUs observed in the scope since `since`. A category scope covers the
    /// category and its whole subtree.
    async fn scope_skus(&self, scope: Scope, since: NaiveDate) -> Result<Vec<SkuRef>> {
        match scope {
            Scope::Category(id) => {
                let mut ids = self.snapshots.descendant_category_ids(id).await?;
                if ids.is_empty() {
                    // Snapshots can reference categories the menu sync has
                    // not registered yet.
                    ids.push(id);
                }
                self.snapshots.skus_in_categories(&ids, since).await
            }
            Scope::Seller(id) => self.snapshots.skus_for_seller(id, since).await,
        }
    }
}

/// Running sums for one period. Counts are distinct products/sellers with at
/// least one sale inside the period; stock is taken from the period's last
/// day, summed over SKUs.
struct PeriodAccumulator {
    from: NaiveDate,
    to: NaiveDate,
    metrics: WindowMetrics,
    active_products: HashSet<i64>,
    active_sellers: HashSet<i64>,
}

impl PeriodAccumulator {
    fn new(from: NaiveDate, to: NaiveDate) -> Self {
        Self {
            from,
            to,
            metrics: WindowMetrics::default(),
            active_products: HashSet::new(),
            active_sellers: HashSet::new(),
        }
    }

    fn add_sku(&mut self, sku: &SkuRef, deltas: &[crate::domain::delta::DailyDelta]) {
        let mut sold = 0i64;
        for delta in deltas {
            if delta.date < self.from || delta.date > self.to {
                continue;
            }
            sold += delta.order_delta;
            self.metrics.revenue += delta.revenue;
            if delta.date == self.to {
                self.metrics.available_amount += delta.available_stock;
            }
        }
        self.metrics.order_amount += sold;
        if sold > 0 {
            self.active_products.insert(sku.product_id);
            self.active_sellers.insert(sku.seller_id);
        }
    }

    fn finish(self) -> WindowMetrics {
        let mut metrics = self.metrics;
        metrics.product_count = self.active_products.len() as i64;
        metrics.seller_count = self.active_sellers.len() as i64;
        metrics.finalize();
        metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::ProductSnapshot;
    use crate::infrastructure::test_support::stores;
    use chrono::{TimeZone, Utc};

    fn snapshot(
        product_id: i64,
        category_id: i64,
        seller_id: i64,
        date: NaiveDate,
        orders: i64,
        price: f64,
        stock: i64,
    ) -> ProductSnapshot {
        ProductSnapshot {
            product_id,
            sku_id: product_id * 10,
            category_id,
            seller_id,
            observed_at: Utc
                .from_utc_datetime(&date.and_hms_opt(12, 0, 0).unwrap()),
            cumulative_order_count: orders,
            available_stock: stock,
            price,
            full_price: None,
            rating: 4.0,
            review_count: 1,
            title: format!("product {product_id}"),
            photo_key: None,
        }
    }

    fn day(offset_from_today: i64) -> NaiveDate {
        Utc::now().date_naive() - chrono::Duration::days(offset_from_today)
    }

    async fn engine() -> (tempfile::TempDir, SnapshotRepository, RollupEngine) {
        let (dir, _cursors, repo) = stores().await;
        let config = WindowConfig {
            week_days: 3,
            two_week_days: 6,
            month_days: 30,
            two_month_days: 60,
            cache_ttl_secs: 900,
        };
        let engine = RollupEngine::new(repo.clone(), config);
        (dir, repo, engine)
    }

    #[tokio::test]
    async fn unobserved_scope_reports_no_data() {
        let (_dir, _repo, engine) = engine().await;
        let agg = engine
            .compute_window(Scope::Category(99), Window::Week, day(0))
            .await
            .unwrap();
        assert!(agg.is_none());
    }

    #[tokio::test]
    async fn sums_periods_and_derives_diff() {
        let (_dir, repo, engine) = engine().await;
        let today = day(0);

        // Daily observations over six days: 10 orders/day in the previous
        // period, 20/day in the current one. The first observed day is a
        // baseline and contributes no delta.
        let mut cumulative = 100i64;
        for offset in (0..6).rev() {
            if offset < 3 {
                cumulative += 20;
            } else if offset < 6 {
                cumulative += 10;
            }
            repo.upsert_product_snapshot(&snapshot(1, 42, 300, day(offset), cumulative, 10.0, 5))
                .await
                .unwrap();
        }

        let agg = engine
            .compute_window(Scope::Category(42), Window::Week, today)
            .await
            .unwrap()
            .unwrap();

        // Previous period days: baseline, +10, +10. Current: +20 each day.
        assert_eq!(agg.previous.order_amount, 20);
        assert_eq!(agg.current.order_amount, 60);
        assert_eq!(agg.previous.revenue, 200.0);
        assert_eq!(agg.current.revenue, 600.0);
        assert_eq!(agg.diff.order_amount_pct, 200.0);
        assert_eq!(agg.current.product_count, 1);
        assert_eq!(agg.current.seller_count, 1);
        assert_eq!(agg.current.available_amount, 5);
        assert_eq!(agg.current.average_bill, 10.0);
    }

    #[tokio::test]
    async fn previous_zero_with_current_sales_reports_hundred_pct() {
        let (_dir, repo, engine) = engine().await;

        // Only observed inside the current period.
        repo.upsert_product_snapshot(&snapshot(1, 42, 300, day(1), 100, 10.0, 5))
            .await
            .unwrap();
        repo.upsert_product_snapshot(&snapshot(1, 42, 300, day(0), 130, 10.0, 5))
            .await
            .unwrap();

        let agg = engine
            .compute_window(Scope::Category(42), Window::Week, day(0))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(agg.previous.order_amount, 0);
        assert_eq!(agg.current.order_amount, 30);
        assert_eq!(agg.diff.order_amount_pct, 100.0);
        assert_eq!(agg.previous.product_count, 0, "no sale, not an active product");
    }

    #[tokio::test]
    async fn category_scope_includes_descendants() {
        let (_dir, repo, engine) = engine().await;
        use crate::domain::entities::Category;
        for (id, parent) in [(1, None), (10, Some(1)), (11, Some(10))] {
            repo.register_category(&Category {
                id,
                parent_id: parent,
                title: format!("cat-{id}"),
                path: None,
                product_amount: 0,
                adult: false,
                eco: false,
            })
            .await
            .unwrap();
        }
        repo.upsert_product_snapshot(&snapshot(1, 11, 300, day(1), 100, 10.0, 5))
            .await
            .unwrap();
        repo.upsert_product_snapshot(&snapshot(1, 11, 300, day(0), 105, 10.0, 5))
            .await
            .unwrap();

        let root = engine
            .compute_window(Scope::Category(1), Window::Week, day(0))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(root.current.order_amount, 5, "grandchild sales roll up to the root");

        let sibling = engine
            .compute_window(Scope::Category(10), Window::Week, day(0))
            .await
            .unwrap();
        assert_eq!(sibling.unwrap().current.order_amount, 5);
    }

    #[tokio::test]
    async fn seller_scope_spans_categories() {
        let (_dir, repo, engine) = engine().await;
        repo.upsert_product_snapshot(&snapshot(1, 42, 300, day(1), 10, 10.0, 2))
            .await
            .unwrap();
        repo.upsert_product_snapshot(&snapshot(1, 42, 300, day(0), 14, 10.0, 2))
            .await
            .unwrap();
        repo.upsert_product_snapshot(&snapshot(2, 77, 300, day(1), 50, 20.0, 3))
            .await
            .unwrap();
        repo.upsert_product_snapshot(&snapshot(2, 77, 300, day(0), 53, 20.0, 3))
            .await
            .unwrap();

        let agg = engine
            .compute_window(Scope::Seller(300), Window::Week, day(0))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(agg.current.order_amount, 7);
        assert_eq!(agg.current.product_count, 2);
        assert_eq!(agg.current.seller_count, 1);
        assert_eq!(agg.current.available_amount, 5);
    }

    #[tokio::test]
    async fn cache_serves_until_invalidated() {
        let (_dir, repo, engine) = engine().await;
        repo.upsert_product_snapshot(&snapshot(1, 42, 300, day(1), 10, 10.0, 2))
            .await
            .unwrap();
        repo.upsert_product_snapshot(&snapshot(1, 42, 300, day(0), 15, 10.0, 2))
            .await
            .unwrap();

        let first = engine
            .compute_window(Scope::Category(42), Window::Week, day(0))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.current.order_amount, 5);

        // New data lands, but the TTL has not elapsed.
        repo.upsert_product_snapshot(&snapshot(2, 42, 300, day(0), 99, 10.0, 2))
            .await
            .unwrap();
        let cached = engine
            .compute_window(Scope::Category(42), Window::Week, day(0))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(cached, first);

        engine.invalidate();
        let fresh = engine
            .compute_window(Scope::Category(42), Window::Week, day(0))
            .await
            .unwrap()
            .unwrap();
        assert_ne!(fresh, first);
    }

    #[tokio::test]
    async fn compute_many_drops_empty_scopes() {
        let (_dir, repo, engine) = engine().await;
        repo.upsert_product_snapshot(&snapshot(1, 42, 300, day(1), 10, 10.0, 2))
            .await
            .unwrap();
        repo.upsert_product_snapshot(&snapshot(1, 42, 300, day(0), 12, 10.0, 2))
            .await
            .unwrap();

        let aggregates = engine
            .compute_many(
                &[Scope::Category(42), Scope::Category(999), Scope::Seller(300)],
                Window::Week,
                day(0),
            )
            .await;
        assert_eq!(aggregates.len(), 2);
    }
}
