//! HTTP client for the Rezdy product pickup endpoint.
//!
//! Wraps `reqwest` with Rezdy-specific status handling, API key management
//! and typed response deserialization. The `requestStatus` envelope is
//! checked on every 2xx response and surfaced as [`RezdyError::ApiError`].

use std::time::Duration;

use async_trait::async_trait;
use pickup_core::{AppConfig, FetchError, PickupFetcher, PickupRecord};
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, StatusCode, Url};

use crate::error::RezdyError;
use crate::retry::retry_with_backoff;
use crate::types::RezdyPickupsResponse;

const DEFAULT_BASE_URL: &str = "https://api.rezdy.com/v1/";
const DEFAULT_MAX_RETRIES: u32 = 2;
const DEFAULT_BACKOFF_BASE_MS: u64 = 500;

/// Client for the Rezdy REST API.
///
/// Use [`RezdyClient::new`] for production or [`RezdyClient::with_base_url`]
/// to point at a mock server in tests.
pub struct RezdyClient {
    client: Client,
    api_key: String,
    base_url: Url,
    max_retries: u32,
    backoff_base_ms: u64,
}

impl std::fmt::Debug for RezdyClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RezdyClient")
            .field("api_key", &"[redacted]")
            .field("base_url", &self.base_url.as_str())
            .field("max_retries", &self.max_retries)
            .field("backoff_base_ms", &self.backoff_base_ms)
            .finish_non_exhaustive()
    }
}

impl RezdyClient {
    /// Creates a client pointed at the production Rezdy API.
    ///
    /// # Errors
    ///
    /// Returns [`RezdyError::Http`] if the underlying `reqwest::Client`
    /// cannot be constructed.
    pub fn new(api_key: &str, timeout: Duration) -> Result<Self, RezdyError> {
        Self::with_base_url(api_key, timeout, DEFAULT_BASE_URL)
    }

    /// Creates a client with a custom base URL (for testing with wiremock).
    ///
    /// # Errors
    ///
    /// Returns [`RezdyError::Http`] if the underlying `reqwest::Client`
    /// cannot be constructed, or [`RezdyError::ApiError`] if `base_url` is
    /// not a usable HTTP base URL.
    pub fn with_base_url(
        api_key: &str,
        timeout: Duration,
        base_url: &str,
    ) -> Result<Self, RezdyError> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(5))
            .user_agent("pickup-resolver/0.1 (pickup-cache)")
            .build()?;

        // Exactly one trailing slash so that path segments append under the
        // base path instead of replacing its last segment.
        let normalised = format!("{}/", base_url.trim_end_matches('/'));
        let parsed = Url::parse(&normalised)
            .map_err(|e| RezdyError::ApiError(format!("invalid base URL '{base_url}': {e}")))?;
        if parsed.cannot_be_a_base() {
            return Err(RezdyError::ApiError(format!(
                "invalid base URL '{base_url}': cannot carry a path"
            )));
        }

        Ok(Self {
            client,
            api_key: api_key.to_owned(),
            base_url: parsed,
            max_retries: DEFAULT_MAX_RETRIES,
            backoff_base_ms: DEFAULT_BACKOFF_BASE_MS,
        })
    }

    /// Builds a client from application config. `None` when no API key is
    /// configured, in which case live fetching is unavailable.
    ///
    /// # Errors
    ///
    /// See [`RezdyClient::with_base_url`].
    pub fn from_app_config(config: &AppConfig) -> Result<Option<Self>, RezdyError> {
        let Some(api_key) = config.rezdy_api_key.as_deref() else {
            return Ok(None);
        };
        let client = Self::with_base_url(api_key, config.fetch_timeout(), &config.rezdy_base_url)?
            .with_retry(config.upstream_max_retries, config.upstream_backoff_ms);
        Ok(Some(client))
    }

    /// Overrides the transient-error retry budget.
    #[must_use]
    pub fn with_retry(mut self, max_retries: u32, backoff_base_ms: u64) -> Self {
        self.max_retries = max_retries;
        self.backoff_base_ms = backoff_base_ms;
        self
    }

    /// Fetches the pickup list for a product.
    ///
    /// An empty list is a valid answer: the product has no pickup service.
    /// Entries without a location name are dropped.
    ///
    /// # Errors
    ///
    /// - [`RezdyError::NotFound`] if Rezdy does not know the product.
    /// - [`RezdyError::ApiError`] if the envelope reports failure.
    /// - [`RezdyError::Http`], [`RezdyError::RateLimited`] or
    ///   [`RezdyError::UnexpectedStatus`] once retries are exhausted.
    /// - [`RezdyError::Deserialize`] if the body does not match the expected
    ///   shape.
    pub async fn get_pickups(&self, product_code: &str) -> Result<Vec<PickupRecord>, RezdyError> {
        let url = self.pickups_url(product_code);
        let url = &url;
        let envelope = retry_with_backoff(self.max_retries, self.backoff_base_ms, || {
            self.request_pickups(url, product_code)
        })
        .await?;

        if !envelope.request_status.success {
            return Err(RezdyError::ApiError(
                envelope.request_status.failure_message(),
            ));
        }

        let pickups: Vec<PickupRecord> = envelope
            .pickup_locations
            .into_iter()
            .filter(|loc| !loc.location_name.trim().is_empty())
            .map(PickupRecord::from)
            .collect();
        tracing::debug!(
            product_code,
            pickups = pickups.len(),
            "fetched pickups from Rezdy"
        );
        Ok(pickups)
    }

    /// `{base}/products/{productCode}/pickups?apiKey=…`, with the product
    /// code percent-encoded as a single path segment.
    fn pickups_url(&self, product_code: &str) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .extend(["products", product_code, "pickups"]);
        }
        url.query_pairs_mut().append_pair("apiKey", &self.api_key);
        url
    }

    async fn request_pickups(
        &self,
        url: &Url,
        product_code: &str,
    ) -> Result<RezdyPickupsResponse, RezdyError> {
        let response = self.client.get(url.clone()).send().await?;
        let status = response.status();

        if status == StatusCode::NOT_FOUND {
            return Err(RezdyError::NotFound {
                product_code: product_code.to_owned(),
            });
        }
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok());
            return Err(RezdyError::RateLimited { retry_after_secs });
        }
        if !status.is_success() {
            // Path only: the query string carries the API key.
            return Err(RezdyError::UnexpectedStatus {
                status: status.as_u16(),
                url: url.path().to_owned(),
            });
        }

        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| RezdyError::Deserialize {
            context: format!("pickups(productCode={product_code})"),
            source: e,
        })
    }
}

#[async_trait]
impl PickupFetcher for RezdyClient {
    async fn fetch_pickups(&self, product_code: &str) -> Result<Vec<PickupRecord>, FetchError> {
        self.get_pickups(product_code)
            .await
            .map_err(|e| FetchError::Upstream {
                product_code: product_code.to_owned(),
                reason: e.to_string(),
            })
    }
}
