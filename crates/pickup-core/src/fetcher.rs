//! The one upstream capability the pickup subsystem consumes.

use async_trait::async_trait;
use thiserror::Error;

use crate::pickup::PickupRecord;

/// Why an upstream pickup fetch produced no data.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    #[error("upstream fetch failed for {product_code}: {reason}")]
    Upstream {
        product_code: String,
        reason: String,
    },

    #[error("upstream fetch for {product_code} timed out after {timeout_ms}ms")]
    Timeout { product_code: String, timeout_ms: u64 },
}

/// Fetches the pickup list for a product from the booking API.
///
/// An empty `Ok` list is a valid answer meaning the product has no pickup
/// service; it is not an error.
#[async_trait]
pub trait PickupFetcher: Send + Sync {
    async fn fetch_pickups(&self, product_code: &str) -> Result<Vec<PickupRecord>, FetchError>;
}
