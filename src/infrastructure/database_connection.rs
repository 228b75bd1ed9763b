//! SQLite connection pool and schema management.

use std::path::Path;

use anyhow::Result;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

use crate::infrastructure::config::DatabaseConfig;

pub struct DatabaseConnection {
    pool: SqlitePool,
}

impl DatabaseConnection {
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let db_path = config
            .url
            .trim_start_matches("sqlite://")
            .trim_start_matches("sqlite:");

        if db_path != ":memory:" {
            if let Some(parent) = Path::new(db_path).parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            if !Path::new(db_path).exists() {
                std::fs::File::create(db_path)?;
            }
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.url)
            .await?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<()> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS crawl_cursors (
                kind TEXT NOT NULL,
                target_id INTEGER NOT NULL,
                next_offset INTEGER NOT NULL DEFAULT 0,
                items_processed INTEGER NOT NULL DEFAULT 0,
                last_known_total INTEGER NOT NULL DEFAULT 0,
                updated_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
                PRIMARY KEY (kind, target_id)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS scheduler_meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS product_snapshots (
                product_id INTEGER NOT NULL,
                sku_id INTEGER NOT NULL,
                day TEXT NOT NULL,
                category_id INTEGER NOT NULL,
                seller_id INTEGER NOT NULL,
                observed_at DATETIME NOT NULL,
                cumulative_order_count INTEGER NOT NULL,
                available_stock INTEGER NOT NULL,
                price REAL NOT NULL,
                full_price REAL,
                rating REAL NOT NULL DEFAULT 0,
                review_count INTEGER NOT NULL DEFAULT 0,
                title TEXT NOT NULL DEFAULT '',
                photo_key TEXT,
                PRIMARY KEY (product_id, sku_id, day)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS position_snapshots (
                category_id INTEGER NOT NULL,
                product_id INTEGER NOT NULL,
                sku_id INTEGER NOT NULL,
                day TEXT NOT NULL,
                observed_at DATETIME NOT NULL,
                position INTEGER NOT NULL,
                PRIMARY KEY (category_id, product_id, sku_id, day)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS categories (
                id INTEGER PRIMARY KEY,
                parent_id INTEGER,
                title TEXT NOT NULL DEFAULT '',
                path TEXT,
                product_amount INTEGER NOT NULL DEFAULT 0,
                adult INTEGER NOT NULL DEFAULT 0,
                eco INTEGER NOT NULL DEFAULT 0
            )
            "#,
            r#"
            CREATE INDEX IF NOT EXISTS idx_snapshots_category
                ON product_snapshots (category_id, day)
            "#,
            r#"
            CREATE INDEX IF NOT EXISTS idx_snapshots_seller
                ON product_snapshots (seller_id, day)
            "#,
            r#"
            CREATE INDEX IF NOT EXISTS idx_positions_lookup
                ON position_snapshots (category_id, product_id, sku_id, day)
            "#,
        ];

        for sql in statements {
            sqlx::query(sql).execute(&self.pool).await?;
        }
        Ok(())
    }
}
