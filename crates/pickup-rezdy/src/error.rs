use thiserror::Error;

/// Errors returned by the Rezdy API client.
#[derive(Debug, Error)]
pub enum RezdyError {
    /// Network or TLS failure from the underlying HTTP client. The request
    /// URL is stripped on conversion since its query carries the API key.
    #[error("HTTP error: {0}")]
    Http(reqwest::Error),

    /// Rezdy answered with `requestStatus.success = false`.
    #[error("Rezdy API error: {0}")]
    ApiError(String),

    /// The response body could not be deserialized into the expected type.
    #[error("JSON deserialization error for {context}: {source}")]
    Deserialize {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    /// Rezdy does not know the product. Never cached as "no pickups".
    #[error("product {product_code} not found upstream")]
    NotFound { product_code: String },

    #[error("rate limited by Rezdy (retry after {retry_after_secs:?}s)")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("unexpected HTTP status {status} from {url}")]
    UnexpectedStatus { status: u16, url: String },
}

impl From<reqwest::Error> for RezdyError {
    fn from(e: reqwest::Error) -> Self {
        RezdyError::Http(e.without_url())
    }
}
