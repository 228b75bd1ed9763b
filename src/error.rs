//! Error taxonomy for crawling and aggregation.
//!
//! Fetch failures are classified at the call site so that the retry policy
//! and the jobs can tell apart "retry this", "skip this item" and
//! "fail the whole job". Thrown errors are reserved for job-fatal
//! conditions; per-item skips travel as values (`SkipReason`).

use std::time::Duration;

use thiserror::Error;

/// Failure of a single outbound marketplace call.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network timeout, connection reset, 5xx. Worth retrying with backoff.
    #[error("transient upstream error: {0}")]
    Transient(String),

    /// Upstream asked us to slow down (429).
    #[error("rate limited by upstream")]
    RateLimited { retry_after: Option<Duration> },

    /// Upstream rejected the pagination offset. The caller advances the
    /// cursor by a fixed step and retries the page; never retried as-is.
    #[error("pagination offset {offset} rejected by upstream")]
    OffsetOutOfRange { offset: u32 },

    /// Auth failure or another condition that will not go away on retry.
    #[error("fatal upstream error: {0}")]
    Fatal(String),

    /// Response arrived but could not be decoded into the expected shape.
    #[error("malformed upstream response: {0}")]
    Malformed(String),
}

impl FetchError {
    /// Whether the retry policy should attempt this call again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FetchError::Transient(_) | FetchError::RateLimited { .. } | FetchError::Malformed(_)
        )
    }
}

/// Why a single listing item was dropped from the current page batch.
///
/// A skipped item never aborts the page or the job; partial data beats no
/// data for a crawl round.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SkipReason {
    #[error("detail fetch failed after retries: {0}")]
    DetailUnavailable(String),

    #[error("detail response missing required field `{0}`")]
    MissingField(&'static str),

    #[error("item has no purchasable sku")]
    NoEligibleSku,
}

/// Job-fatal conditions. Contained to the failing job; sibling jobs and the
/// scheduler keep running, and the next round resumes the target from its
/// last persisted cursor.
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("upstream failure ended the job: {0}")]
    Upstream(#[from] FetchError),

    #[error("storage failure: {0}")]
    Storage(#[from] anyhow::Error),

    #[error("job cancelled by shutdown")]
    Cancelled,
}
