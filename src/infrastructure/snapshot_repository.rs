//! Append-only observation store plus the read surface consumers use.
//!
//! Product snapshots are keyed (product, sku, calendar day): a crawl that
//! revisits the same SKU the same day overwrites instead of duplicating,
//! which is what makes re-crawls idempotent. Daily deltas are never stored
//! here — they are recomputed from snapshots on demand.

use anyhow::Result;
use chrono::NaiveDate;
use sqlx::{Row, SqlitePool};

use crate::domain::delta::{reconstruct_range, DailyDelta};
use crate::domain::entities::{Category, PositionSnapshot, ProductSnapshot};
use crate::infrastructure::marketplace_client::CategoryTreeNode;

/// One gap-filled point of a SKU's category-rank history. Days with no
/// observation report position 0 so consumers never re-implement the fill.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionPoint {
    pub date: NaiveDate,
    pub position: u32,
}

/// A (product, sku) pair observed inside some rollup scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SkuRef {
    pub product_id: i64,
    pub sku_id: i64,
    pub seller_id: i64,
}

#[derive(Clone)]
pub struct SnapshotRepository {
    pool: SqlitePool,
}

impl SnapshotRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    // ===============================
    // WRITES
    // ===============================

    pub async fn upsert_product_snapshot(&self, snapshot: &ProductSnapshot) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO product_snapshots
            (product_id, sku_id, day, category_id, seller_id, observed_at,
             cumulative_order_count, available_stock, price, full_price,
             rating, review_count, title, photo_key)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(snapshot.product_id)
        .bind(snapshot.sku_id)
        .bind(snapshot.day())
        .bind(snapshot.category_id)
        .bind(snapshot.seller_id)
        .bind(snapshot.observed_at)
        .bind(snapshot.cumulative_order_count)
        .bind(snapshot.available_stock)
        .bind(snapshot.price)
        .bind(snapshot.full_price)
        .bind(snapshot.rating)
        .bind(snapshot.review_count)
        .bind(&snapshot.title)
        .bind(&snapshot.photo_key)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn upsert_product_snapshots(&self, snapshots: &[ProductSnapshot]) -> Result<()> {
        for snapshot in snapshots {
            self.upsert_product_snapshot(snapshot).await?;
        }
        Ok(())
    }

    pub async fn insert_position_snapshots(&self, snapshots: &[PositionSnapshot]) -> Result<()> {
        for snapshot in snapshots {
            sqlx::query(
                r#"
                INSERT OR REPLACE INTO position_snapshots
                (category_id, product_id, sku_id, day, observed_at, position)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(snapshot.category_id)
            .bind(snapshot.product_id)
            .bind(snapshot.sku_id)
            .bind(snapshot.observed_at.date_naive())
            .bind(snapshot.observed_at)
            .bind(snapshot.position as i64)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    /// Fold one ancestor chain from a search response into the category
    /// table. Nodes arrive root-to-leaf, so parent paths resolve before
    /// their children within a single call.
    pub async fn upsert_category_tree(&self, tree: &[CategoryTreeNode]) -> Result<()> {
        for node in tree {
            let parent_path: Option<String> = match node.parent_id {
                Some(parent_id) => self.category_path(parent_id).await?,
                None => None,
            };
            let path = match (&parent_path, node.parent_id) {
                (Some(parent_path), _) => Some(format!("{parent_path}/{}", node.id)),
                (None, None) => Some(node.id.to_string()),
                // Parent not seen yet: leave unresolved, a later round fills it.
                (None, Some(_)) => None,
            };
            sqlx::query(
                r#"
                INSERT INTO categories (id, parent_id, title, path)
                VALUES (?, ?, ?, ?)
                ON CONFLICT(id) DO UPDATE SET
                    parent_id = excluded.parent_id,
                    title = excluded.title,
                    path = COALESCE(excluded.path, categories.path)
                "#,
            )
            .bind(node.id)
            .bind(node.parent_id)
            .bind(&node.title)
            .bind(path)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    /// Register a category discovered through the menu tree. Keeps an
    /// already-resolved path: resolution belongs to the crawls.
    pub async fn register_category(&self, category: &Category) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO categories
            (id, parent_id, title, path, product_amount, adult, eco)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                parent_id = COALESCE(excluded.parent_id, categories.parent_id),
                title = excluded.title,
                path = COALESCE(excluded.path, categories.path),
                product_amount = excluded.product_amount,
                adult = excluded.adult,
                eco = excluded.eco
            "#,
        )
        .bind(category.id)
        .bind(category.parent_id)
        .bind(&category.title)
        .bind(&category.path)
        .bind(category.product_amount)
        .bind(category.adult)
        .bind(category.eco)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ===============================
    // TARGET ENUMERATION
    // ===============================

    /// Categories the product crawler still owes a pass: their ancestor
    /// path has not been resolved by any crawl yet.
    pub async fn category_ids_without_path(&self) -> Result<Vec<i64>> {
        let rows = sqlx::query("SELECT id FROM categories WHERE path IS NULL ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(|row| row.get("id")).collect())
    }

    /// Root categories, used by position tracking.
    pub async fn root_category_ids(&self) -> Result<Vec<i64>> {
        let rows = sqlx::query("SELECT id FROM categories WHERE parent_id IS NULL ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(|row| row.get("id")).collect())
    }

    /// Every seller id ever observed in a product snapshot.
    pub async fn distinct_seller_ids(&self) -> Result<Vec<i64>> {
        let rows = sqlx::query(
            "SELECT DISTINCT seller_id FROM product_snapshots WHERE seller_id > 0 ORDER BY seller_id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(|row| row.get("seller_id")).collect())
    }

    // ===============================
    // READS
    // ===============================

    async fn category_path(&self, category_id: i64) -> Result<Option<String>> {
        let row = sqlx::query("SELECT path FROM categories WHERE id = ?")
            .bind(category_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.and_then(|row| row.get("path")))
    }

    /// The category and all of its transitive descendants.
    pub async fn descendant_category_ids(&self, category_id: i64) -> Result<Vec<i64>> {
        let rows = sqlx::query(
            r#"
            WITH RECURSIVE subtree(id) AS (
                SELECT id FROM categories WHERE id = ?
                UNION ALL
                SELECT c.id FROM categories c JOIN subtree s ON c.parent_id = s.id
            )
            SELECT id FROM subtree
            "#,
        )
        .bind(category_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(|row| row.get("id")).collect())
    }

    pub async fn snapshots_for_sku(&self, product_id: i64, sku_id: i64) -> Result<Vec<ProductSnapshot>> {
        let rows = sqlx::query(
            r#"
            SELECT product_id, sku_id, category_id, seller_id, observed_at,
                   cumulative_order_count, available_stock, price, full_price,
                   rating, review_count, title, photo_key
            FROM product_snapshots
            WHERE product_id = ? AND sku_id = ?
            ORDER BY observed_at
            "#,
        )
        .bind(product_id)
        .bind(sku_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|row| row_to_snapshot(&row)).collect())
    }

    /// Distinct SKUs observed under the given categories on or after
    /// `since`.
    pub async fn skus_in_categories(&self, category_ids: &[i64], since: NaiveDate) -> Result<Vec<SkuRef>> {
        if category_ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; category_ids.len()].join(", ");
        let sql = format!(
            "SELECT DISTINCT product_id, sku_id, seller_id FROM product_snapshots \
             WHERE category_id IN ({placeholders}) AND day >= ?"
        );
        let mut query = sqlx::query(&sql);
        for id in category_ids {
            query = query.bind(id);
        }
        let rows = query.bind(since).fetch_all(&self.pool).await?;
        Ok(rows.iter().map(row_to_sku_ref).collect())
    }

    pub async fn skus_for_seller(&self, seller_id: i64, since: NaiveDate) -> Result<Vec<SkuRef>> {
        let rows = sqlx::query(
            "SELECT DISTINCT product_id, sku_id, seller_id FROM product_snapshots \
             WHERE seller_id = ? AND day >= ?",
        )
        .bind(seller_id)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_sku_ref).collect())
    }

    /// Daily delta series for one SKU over `[from, to]`, dense over the
    /// whole range. `None` when the SKU has never been observed —
    /// consumers can tell "no sales" apart from "no data collected yet".
    pub async fn daily_deltas(
        &self,
        product_id: i64,
        sku_id: i64,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Option<Vec<DailyDelta>>> {
        let snapshots = self.snapshots_for_sku(product_id, sku_id).await?;
        if snapshots.is_empty() {
            return Ok(None);
        }
        Ok(Some(reconstruct_range(&snapshots, from, to)))
    }

    /// Gap-filled rank history for one SKU in one category: exactly one
    /// point per day in `[from, to]`, position 0 on unobserved days.
    /// `None` when nothing was ever observed for the triple.
    pub async fn position_series(
        &self,
        category_id: i64,
        product_id: i64,
        sku_id: i64,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Option<Vec<PositionPoint>>> {
        let rows = sqlx::query(
            r#"
            SELECT day, position FROM position_snapshots
            WHERE category_id = ? AND product_id = ? AND sku_id = ?
            ORDER BY day
            "#,
        )
        .bind(category_id)
        .bind(product_id)
        .bind(sku_id)
        .fetch_all(&self.pool)
        .await?;

        if rows.is_empty() {
            return Ok(None);
        }

        let mut observed = std::collections::HashMap::new();
        for row in rows {
            let day: NaiveDate = row.get("day");
            let position: i64 = row.get("position");
            observed.insert(day, position as u32);
        }

        let mut series = Vec::new();
        let mut date = from;
        while date <= to {
            series.push(PositionPoint {
                date,
                position: observed.get(&date).copied().unwrap_or(0),
            });
            date += chrono::Duration::days(1);
        }
        Ok(Some(series))
    }

    pub async fn count_product_snapshots(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM product_snapshots")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("n"))
    }
}

fn row_to_snapshot(row: &sqlx::sqlite::SqliteRow) -> ProductSnapshot {
    ProductSnapshot {
        product_id: row.get("product_id"),
        sku_id: row.get("sku_id"),
        category_id: row.get("category_id"),
        seller_id: row.get("seller_id"),
        observed_at: row.get("observed_at"),
        cumulative_order_count: row.get("cumulative_order_count"),
        available_stock: row.get("available_stock"),
        price: row.get("price"),
        full_price: row.get("full_price"),
        rating: row.get("rating"),
        review_count: row.get("review_count"),
        title: row.get("title"),
        photo_key: row.get("photo_key"),
    }
}

fn row_to_sku_ref(row: &sqlx::sqlite::SqliteRow) -> SkuRef {
    SkuRef {
        product_id: row.get("product_id"),
        sku_id: row.get("sku_id"),
        seller_id: row.get("seller_id"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::config::DatabaseConfig;
    use crate::infrastructure::database_connection::DatabaseConnection;
    use chrono::{TimeZone, Utc};
    use tempfile::{tempdir, TempDir};

    pub(crate) async fn test_repo() -> (TempDir, SnapshotRepository) {
        let dir = tempdir().unwrap();
        let config = DatabaseConfig {
            url: format!("sqlite:{}", dir.path().join("snapshots.db").display()),
            max_connections: 2,
        };
        let db = DatabaseConnection::new(&config).await.unwrap();
        db.migrate().await.unwrap();
        (dir, SnapshotRepository::new(db.pool().clone()))
    }

    fn snapshot(product: i64, sku: i64, day: u32, count: i64) -> ProductSnapshot {
        ProductSnapshot {
            product_id: product,
            sku_id: sku,
            category_id: 77,
            seller_id: 300,
            observed_at: Utc.with_ymd_and_hms(2026, 4, day, 12, 0, 0).unwrap(),
            cumulative_order_count: count,
            available_stock: 5,
            price: 10.0,
            full_price: None,
            rating: 4.0,
            review_count: 3,
            title: "thing".into(),
            photo_key: None,
        }
    }

    #[tokio::test]
    async fn same_day_upsert_overwrites_not_duplicates() {
        let (_dir, repo) = test_repo().await;
        let mut snap = snapshot(1, 10, 1, 100);
        repo.upsert_product_snapshot(&snap).await.unwrap();

        snap.cumulative_order_count = 105;
        repo.upsert_product_snapshot(&snap).await.unwrap();

        assert_eq!(repo.count_product_snapshots().await.unwrap(), 1);
        let stored = repo.snapshots_for_sku(1, 10).await.unwrap();
        assert_eq!(stored[0].cumulative_order_count, 105);
    }

    #[tokio::test]
    async fn distinct_sellers_come_from_snapshots() {
        let (_dir, repo) = test_repo().await;
        let mut a = snapshot(1, 10, 1, 100);
        a.seller_id = 300;
        let mut b = snapshot(2, 20, 1, 50);
        b.seller_id = 301;
        let mut c = snapshot(3, 30, 2, 10);
        c.seller_id = 300;
        repo.upsert_product_snapshots(&[a, b, c]).await.unwrap();

        assert_eq!(repo.distinct_seller_ids().await.unwrap(), vec![300, 301]);
    }

    #[tokio::test]
    async fn category_tree_resolves_paths_and_descendants() {
        let (_dir, repo) = test_repo().await;
        let tree = vec![
            CategoryTreeNode { id: 1, parent_id: None, title: "root".into() },
            CategoryTreeNode { id: 10, parent_id: Some(1), title: "mid".into() },
            CategoryTreeNode { id: 100, parent_id: Some(10), title: "leaf".into() },
        ];
        repo.upsert_category_tree(&tree).await.unwrap();

        assert!(repo.category_ids_without_path().await.unwrap().is_empty());
        assert_eq!(repo.root_category_ids().await.unwrap(), vec![1]);

        let mut subtree = repo.descendant_category_ids(1).await.unwrap();
        subtree.sort_unstable();
        assert_eq!(subtree, vec![1, 10, 100]);

        assert_eq!(repo.descendant_category_ids(10).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn orphan_tree_node_stays_unresolved_until_parent_arrives() {
        let (_dir, repo) = test_repo().await;
        let orphan = vec![CategoryTreeNode { id: 50, parent_id: Some(5), title: "orphan".into() }];
        repo.upsert_category_tree(&orphan).await.unwrap();
        assert_eq!(repo.category_ids_without_path().await.unwrap(), vec![50]);

        let chain = vec![
            CategoryTreeNode { id: 5, parent_id: None, title: "parent".into() },
            CategoryTreeNode { id: 50, parent_id: Some(5), title: "orphan".into() },
        ];
        repo.upsert_category_tree(&chain).await.unwrap();
        assert!(repo.category_ids_without_path().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn position_series_is_gap_filled_with_zero() {
        let (_dir, repo) = test_repo().await;
        let observed = PositionSnapshot {
            product_id: 1,
            sku_id: 10,
            category_id: 7,
            observed_at: Utc.with_ymd_and_hms(2026, 4, 2, 9, 0, 0).unwrap(),
            position: 14,
        };
        repo.insert_position_snapshots(&[observed]).await.unwrap();

        let from = NaiveDate::from_ymd_opt(2026, 4, 1).unwrap();
        let to = NaiveDate::from_ymd_opt(2026, 4, 3).unwrap();
        let series = repo.position_series(7, 1, 10, from, to).await.unwrap().unwrap();
        let positions: Vec<u32> = series.iter().map(|p| p.position).collect();
        assert_eq!(positions, vec![0, 14, 0]);
    }

    #[tokio::test]
    async fn empty_reads_are_none_not_zero_filled() {
        let (_dir, repo) = test_repo().await;
        let from = NaiveDate::from_ymd_opt(2026, 4, 1).unwrap();
        let to = NaiveDate::from_ymd_opt(2026, 4, 3).unwrap();
        assert!(repo.daily_deltas(1, 10, from, to).await.unwrap().is_none());
        assert!(repo.position_series(7, 1, 10, from, to).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn skus_in_categories_respects_scope_and_date() {
        let (_dir, repo) = test_repo().await;
        let mut in_scope = snapshot(1, 10, 5, 100);
        in_scope.category_id = 77;
        let mut other_cat = snapshot(2, 20, 5, 50);
        other_cat.category_id = 99;
        let mut too_old = snapshot(3, 30, 1, 10);
        too_old.category_id = 77;
        repo.upsert_product_snapshots(&[in_scope, other_cat, too_old]).await.unwrap();

        let since = NaiveDate::from_ymd_opt(2026, 4, 3).unwrap();
        let skus = repo.skus_in_categories(&[77], since).await.unwrap();
        assert_eq!(skus.len(), 1);
        assert_eq!(skus[0].product_id, 1);
    }
}
