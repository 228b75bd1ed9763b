//! Inter-item throttling and bounded-backoff retry.
//!
//! The throttle pause is mandatory between per-item detail fetches — it is
//! the primary defense against upstream ban escalation, and it still
//! applies on retry paths. The retry policy wraps individual fetch calls
//! with jittered exponential backoff and gives up after a bounded number
//! of attempts; non-retryable failures surface immediately.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::FetchError;
use crate::infrastructure::config::CrawlerConfig;

/// Uniform-random sleep in a configured `[min, max]` range.
#[derive(Debug, Clone)]
pub struct ThrottlePolicy {
    min: Duration,
    max: Duration,
}

impl ThrottlePolicy {
    pub fn new(min: Duration, max: Duration) -> Self {
        debug_assert!(min <= max);
        Self { min, max }
    }

    pub fn from_config(config: &CrawlerConfig) -> Self {
        Self::new(
            Duration::from_millis(config.throttle_min_ms),
            Duration::from_millis(config.throttle_max_ms),
        )
    }

    /// Pick the next pause duration.
    pub fn next_delay(&self) -> Duration {
        let min = self.min.as_millis() as u64;
        let max = self.max.as_millis() as u64;
        if max <= min {
            return self.min;
        }
        Duration::from_millis(fastrand::u64(min..=max))
    }

    /// Sleep the jittered inter-item delay.
    pub async fn pause(&self) {
        tokio::time::sleep(self.next_delay()).await;
    }
}

/// Bounded exponential backoff for transient fetch failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_backoff: Duration,
    max_backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_backoff,
            max_backoff,
        }
    }

    pub fn from_config(config: &CrawlerConfig) -> Self {
        Self::new(
            config.max_retries.max(1),
            Duration::from_millis(config.retry_base_ms),
            Duration::from_millis(config.retry_max_ms),
        )
    }

    fn backoff_for(&self, attempt: u32) -> Duration {
        let exp = self
            .base_backoff
            .as_millis()
            .saturating_mul(1u128 << attempt.saturating_sub(1).min(16)) as u64;
        let capped = exp.min(self.max_backoff.as_millis() as u64);
        // Up to 25% jitter on top keeps concurrent jobs from retrying in
        // lockstep.
        let jitter = fastrand::u64(0..=capped / 4 + 1);
        Duration::from_millis(capped + jitter)
    }

    /// Run `op` until it succeeds, fails non-retryably, or exhausts the
    /// attempt budget. The last error is returned to the caller, which
    /// decides whether that means "skip the item" or "end the page loop".
    pub async fn call<T, F, Fut>(&self, what: &str, op: F) -> Result<T, FetchError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if !err.is_retryable() => return Err(err),
                Err(err) if attempt >= self.max_attempts => {
                    warn!("{what}: giving up after {attempt} attempts: {err}");
                    return Err(err);
                }
                Err(err) => {
                    let backoff = match &err {
                        FetchError::RateLimited {
                            retry_after: Some(after),
                        } => (*after).max(self.backoff_for(attempt)),
                        _ => self.backoff_for(attempt),
                    };
                    debug!("{what}: attempt {attempt} failed ({err}), retrying in {backoff:?}");
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
            }
        }
    }
}
