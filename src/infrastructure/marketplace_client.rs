//! Typed client for the marketplace API.
//!
//! The crawler only ever talks to the [`MarketplaceApi`] trait; the reqwest
//! implementation below handles transport, rate limiting and error
//! classification. Request construction and authentication specifics stay
//! out of the crawl logic entirely.

use std::num::NonZeroU32;
use std::time::Duration;

use async_trait::async_trait;
use governor::clock::DefaultClock;
use governor::state::direct::NotKeyed;
use governor::state::InMemoryState;
use governor::{Quota, RateLimiter};
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use url::Url;

use crate::error::FetchError;
use crate::infrastructure::config::MarketplaceConfig;

/// One root (or child) node of the marketplace category tree.
#[derive(Debug, Clone, Deserialize)]
pub struct CategoryNode {
    pub id: i64,
    pub title: String,
    #[serde(default)]
    pub product_amount: i64,
    #[serde(default)]
    pub adult: bool,
    #[serde(default)]
    pub eco: bool,
    #[serde(default)]
    pub children: Vec<CategoryNode>,
}

/// Flat ancestor chain attached to search responses; resolves category
/// paths as a side effect of crawling.
#[derive(Debug, Clone, Deserialize)]
pub struct CategoryTreeNode {
    pub id: i64,
    pub parent_id: Option<i64>,
    pub title: String,
}

/// One item of a paginated category/seller search page.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchItem {
    pub product_id: i64,
    /// Eligible (in-stock) SKUs of the item. May be empty.
    #[serde(default)]
    pub sku_ids: Vec<i64>,
    #[serde(default)]
    pub characteristics: Vec<String>,
}

/// One page of search results.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchPage {
    pub items: Vec<SearchItem>,
    /// Upstream's reported total item count for the whole listing.
    pub total: u32,
    #[serde(default)]
    pub category_tree: Vec<CategoryTreeNode>,
    #[serde(default)]
    pub errors: Vec<String>,
}

/// Per-SKU slice of a product detail response.
#[derive(Debug, Clone, Deserialize)]
pub struct SkuDetail {
    pub sku_id: i64,
    pub available_amount: i64,
    /// Cumulative orders-ever-placed counter.
    pub order_count: i64,
    pub purchase_price: f64,
    pub full_price: Option<f64>,
    #[serde(default)]
    pub characteristics: Vec<String>,
    pub photo_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SellerInfo {
    pub id: i64,
    pub title: String,
}

/// Full product detail response.
#[derive(Debug, Clone, Deserialize)]
pub struct ProductDetailResponse {
    pub product_id: i64,
    pub sku_list: Vec<SkuDetail>,
    #[serde(default)]
    pub rating: f64,
    #[serde(default)]
    pub review_count: i64,
    pub title: String,
    pub seller: SellerInfo,
    /// Root-to-leaf category ids.
    #[serde(default)]
    pub category_path: Vec<i64>,
}

/// Outbound marketplace calls. Knows nothing about scheduling or storage.
#[async_trait]
pub trait MarketplaceApi: Send + Sync {
    async fn get_root_categories(&self) -> Result<Vec<CategoryNode>, FetchError>;

    async fn get_category_search(
        &self,
        category_id: i64,
        offset: u32,
        limit: u32,
    ) -> Result<SearchPage, FetchError>;

    async fn get_seller_search(
        &self,
        seller_id: i64,
        offset: u32,
        limit: u32,
    ) -> Result<SearchPage, FetchError>;

    async fn get_product_detail(&self, product_id: i64) -> Result<ProductDetailResponse, FetchError>;
}

/// reqwest-backed implementation with a process-wide request-rate quota.
pub struct HttpMarketplaceApi {
    client: Client,
    rate_limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
    base_url: String,
}

impl HttpMarketplaceApi {
    pub fn new(config: &MarketplaceConfig) -> Result<Self, FetchError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&config.user_agent)
                .map_err(|e| FetchError::Fatal(format!("invalid user agent: {e}")))?,
        );

        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .default_headers(headers)
            .gzip(true)
            .build()
            .map_err(|e| FetchError::Fatal(format!("failed to build http client: {e}")))?;

        let quota = Quota::per_second(
            NonZeroU32::new(config.max_requests_per_second)
                .ok_or_else(|| FetchError::Fatal("request rate must be > 0".into()))?,
        );

        // Catch a malformed base url at startup, not on the first request.
        let base = Url::parse(&config.base_url)
            .map_err(|e| FetchError::Fatal(format!("invalid base url {:?}: {e}", config.base_url)))?;

        Ok(Self {
            client,
            rate_limiter: RateLimiter::direct(quota),
            base_url: base.as_str().trim_end_matches('/').to_string(),
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        offset: Option<u32>,
    ) -> Result<T, FetchError> {
        self.rate_limiter.until_ready().await;
        tracing::debug!("GET {url}");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::Transient(format!("request to {url} failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(status, url, offset));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| FetchError::Malformed(format!("decoding {url}: {e}")))
    }
}

fn classify_status(status: StatusCode, url: &str, offset: Option<u32>) -> FetchError {
    match status {
        StatusCode::TOO_MANY_REQUESTS => FetchError::RateLimited { retry_after: None },
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            FetchError::Fatal(format!("auth rejected ({status}) for {url}"))
        }
        // The listing endpoints answer 400 when the offset runs past the
        // (moving) end of the result set.
        StatusCode::BAD_REQUEST => match offset {
            Some(offset) => FetchError::OffsetOutOfRange { offset },
            None => FetchError::Fatal(format!("bad request for {url}")),
        },
        s if s.is_server_error() => FetchError::Transient(format!("{status} from {url}")),
        _ => FetchError::Fatal(format!("unexpected {status} from {url}")),
    }
}

#[async_trait]
impl MarketplaceApi for HttpMarketplaceApi {
    async fn get_root_categories(&self) -> Result<Vec<CategoryNode>, FetchError> {
        let url = format!("{}/api/v2/main/menu", self.base_url);
        self.get_json(&url, None).await
    }

    async fn get_category_search(
        &self,
        category_id: i64,
        offset: u32,
        limit: u32,
    ) -> Result<SearchPage, FetchError> {
        let url = format!(
            "{}/api/v2/search?category={category_id}&offset={offset}&limit={limit}",
            self.base_url
        );
        self.get_json(&url, Some(offset)).await
    }

    async fn get_seller_search(
        &self,
        seller_id: i64,
        offset: u32,
        limit: u32,
    ) -> Result<SearchPage, FetchError> {
        let url = format!(
            "{}/api/v2/search?seller={seller_id}&offset={offset}&limit={limit}",
            self.base_url
        );
        self.get_json(&url, Some(offset)).await
    }

    async fn get_product_detail(&self, product_id: i64) -> Result<ProductDetailResponse, FetchError> {
        let url = format!("{}/api/v2/product/{product_id}", self.base_url);
        self.get_json(&url, None).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert!(matches!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, "u", None),
            FetchError::RateLimited { .. }
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_REQUEST, "u", Some(700)),
            FetchError::OffsetOutOfRange { offset: 700 }
        ));
        assert!(matches!(
            classify_status(StatusCode::FORBIDDEN, "u", None),
            FetchError::Fatal(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_GATEWAY, "u", None),
            FetchError::Transient(_)
        ));
    }

    #[test]
    fn client_rejects_malformed_base_url() {
        let config = MarketplaceConfig {
            base_url: "not a url".into(),
            ..Default::default()
        };
        assert!(HttpMarketplaceApi::new(&config).is_err());
    }

    #[test]
    fn client_rejects_zero_request_rate() {
        let config = MarketplaceConfig {
            max_requests_per_second: 0,
            ..Default::default()
        };
        assert!(HttpMarketplaceApi::new(&config).is_err());
    }
}
