//! Configuration loading and management.
//!
//! Settings come from a JSON config file with sane defaults, with a few
//! environment overrides (`MARKETSIGHT_*`) for deployment knobs. Every
//! throttle/cap value the crawler honors is declared here so operational
//! tuning never requires a rebuild.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::info;

/// Complete application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    pub crawler: CrawlerConfig,
    pub windows: WindowConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub marketplace: MarketplaceConfig,
}

/// Crawl scheduling and throttling knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlerConfig {
    /// Mandatory inter-item delay, drawn uniformly from [min, max].
    pub throttle_min_ms: u64,
    pub throttle_max_ms: u64,

    /// Global cap on concurrently running crawl jobs per kind.
    pub max_in_flight_jobs: usize,
    /// How often the scheduler re-checks capacity while saturated.
    pub capacity_poll_ms: u64,

    /// Jobs submitted between cool-down sleeps.
    pub batch_submit_size: usize,
    pub batch_cool_down_ms: u64,

    /// Items requested per search page.
    pub page_size: u32,
    /// Cursor advance applied when upstream rejects the offset.
    pub offset_recovery_step: u32,

    /// Bounded exponential backoff for transient fetch failures.
    pub max_retries: u32,
    pub retry_base_ms: u64,
    pub retry_max_ms: u64,

    /// Interval between scheduling rounds in the daemon.
    pub round_interval_secs: u64,

    /// Position ingest buffering: flush on count or on elapsed time,
    /// whichever comes first.
    pub ingest_buffer_size: usize,
    pub ingest_flush_ms: u64,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            throttle_min_ms: 50,
            throttle_max_ms: 2000,
            max_in_flight_jobs: 60,
            capacity_poll_ms: 500,
            batch_submit_size: 50,
            batch_cool_down_ms: 5000,
            page_size: 100,
            offset_recovery_step: 100,
            max_retries: 3,
            retry_base_ms: 1000,
            retry_max_ms: 60_000,
            round_interval_secs: 3600,
            ingest_buffer_size: 500,
            ingest_flush_ms: 2000,
        }
    }
}

/// Trailing-window lengths in days plus the rollup cache TTL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowConfig {
    pub week_days: i64,
    pub two_week_days: i64,
    pub month_days: i64,
    pub two_month_days: i64,
    pub cache_ttl_secs: u64,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            week_days: 7,
            two_week_days: 14,
            month_days: 30,
            two_month_days: 60,
            cache_ttl_secs: 900,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite:data/marketsight.db".to_string(),
            max_connections: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// "error", "warn", "info", "debug" or "trace".
    pub level: String,
    /// Module-specific filters, e.g. "sqlx": "warn".
    pub module_filters: HashMap<String, String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        let mut module_filters = HashMap::new();
        module_filters.insert("sqlx".to_string(), "warn".to_string());
        module_filters.insert("reqwest".to_string(), "info".to_string());
        Self {
            level: "info".to_string(),
            module_filters,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketplaceConfig {
    pub base_url: String,
    pub user_agent: String,
    pub request_timeout_secs: u64,
    pub max_requests_per_second: u32,
}

impl Default for MarketplaceConfig {
    fn default() -> Self {
        Self {
            base_url: "https://marketplace.example".to_string(),
            user_agent: "marketsight/0.3".to_string(),
            request_timeout_secs: 30,
            max_requests_per_second: 5,
        }
    }
}

impl AppConfig {
    /// Load from a JSON file, falling back to defaults (and writing them
    /// out) when the file does not exist yet. Environment overrides are
    /// applied last.
    pub async fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let raw = fs::read_to_string(path)
                .await
                .with_context(|| format!("reading config file {}", path.display()))?;
            serde_json::from_str(&raw)
                .with_context(|| format!("parsing config file {}", path.display()))?
        } else {
            info!("config file {} not found, writing defaults", path.display());
            let config = Self::default();
            config.save(path).await?;
            config
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let raw = serde_json::to_string_pretty(self)?;
        fs::write(path, raw)
            .await
            .with_context(|| format!("writing config file {}", path.display()))?;
        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("MARKETSIGHT_DATABASE_URL") {
            self.database.url = url;
        }
        if let Ok(base) = std::env::var("MARKETSIGHT_BASE_URL") {
            self.marketplace.base_url = base;
        }
        if let Ok(level) = std::env::var("MARKETSIGHT_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(cap) = std::env::var("MARKETSIGHT_MAX_IN_FLIGHT") {
            if let Ok(cap) = cap.parse() {
                self.crawler.max_in_flight_jobs = cap;
            }
        }
    }

    fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.crawler.throttle_min_ms <= self.crawler.throttle_max_ms,
            "throttle_min_ms must not exceed throttle_max_ms"
        );
        anyhow::ensure!(self.crawler.max_in_flight_jobs > 0, "max_in_flight_jobs must be > 0");
        anyhow::ensure!(self.crawler.page_size > 0, "page_size must be > 0");
        anyhow::ensure!(self.windows.week_days > 0, "window lengths must be > 0");
        Ok(())
    }

    /// Days for one window size.
    pub fn window_days(&self, window: crate::domain::Window) -> i64 {
        use crate::domain::Window;
        match window {
            Window::Week => self.windows.week_days,
            Window::TwoWeek => self.windows.two_week_days,
            Window::Month => self.windows.month_days,
            Window::TwoMonth => self.windows.two_month_days,
        }
    }
}
