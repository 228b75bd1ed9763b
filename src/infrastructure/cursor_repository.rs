//! Durable per-target pagination state.
//!
//! A cursor is written after every completed page, not only at job
//! completion, so a crash mid-crawl resumes from the last completed page.
//! The scheduler guarantees at most one running job per target, so cursor
//! writes never race.

use anyhow::Result;
use sqlx::{Row, SqlitePool};

use crate::domain::entities::{CrawlTarget, TargetKind};

#[derive(Clone)]
pub struct CursorRepository {
    pool: SqlitePool,
}

impl CursorRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn load(&self, kind: TargetKind, target_id: i64) -> Result<Option<CrawlTarget>> {
        let row = sqlx::query(
            r#"
            SELECT next_offset, items_processed, last_known_total
            FROM crawl_cursors WHERE kind = ? AND target_id = ?
            "#,
        )
        .bind(kind.as_str())
        .bind(target_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| CrawlTarget {
            kind,
            target_id,
            offset: row.get::<i64, _>("next_offset") as u32,
            items_processed: row.get::<i64, _>("items_processed") as u32,
            last_known_total: row.get::<i64, _>("last_known_total") as u32,
        }))
    }

    /// Load the target's cursor, creating a zeroed one on first sight.
    pub async fn load_or_create(&self, kind: TargetKind, target_id: i64) -> Result<CrawlTarget> {
        if let Some(target) = self.load(kind, target_id).await? {
            return Ok(target);
        }
        let target = CrawlTarget::new(kind, target_id);
        self.save(&target).await?;
        Ok(target)
    }

    pub async fn save(&self, target: &CrawlTarget) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO crawl_cursors
            (kind, target_id, next_offset, items_processed, last_known_total, updated_at)
            VALUES (?, ?, ?, ?, ?, CURRENT_TIMESTAMP)
            "#,
        )
        .bind(target.kind.as_str())
        .bind(target.target_id)
        .bind(target.offset as i64)
        .bind(target.items_processed as i64)
        .bind(target.last_known_total as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Small key/value store for scheduler state (sweep direction).
    pub async fn get_meta(&self, key: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT value FROM scheduler_meta WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|row| row.get("value")))
    }

    pub async fn set_meta(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query("INSERT OR REPLACE INTO scheduler_meta (key, value) VALUES (?, ?)")
            .bind(key)
            .bind(value)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
