//! Retry with exponential back-off and jitter for the Rezdy client.
//!
//! [`retry_with_backoff`] retries transient failures (network errors, 429,
//! 5xx). Everything else, including an unknown product, is returned at once.

use std::future::Future;
use std::time::Duration;

use crate::error::RezdyError;

/// Returns `true` for errors that are worth retrying after a back-off delay.
///
/// **Retriable:** timeouts and connection failures, HTTP 5xx, and
/// [`RezdyError::RateLimited`].
///
/// **Not retriable:** [`RezdyError::NotFound`], [`RezdyError::ApiError`],
/// [`RezdyError::Deserialize`] and other unexpected statuses.
pub(crate) fn is_retriable(err: &RezdyError) -> bool {
    match err {
        RezdyError::Http(e) => {
            e.is_timeout() || e.is_connect() || e.status().is_some_and(|s| s.is_server_error())
        }
        RezdyError::RateLimited { .. } => true,
        RezdyError::UnexpectedStatus { status, .. } => *status >= 500,
        RezdyError::NotFound { .. } | RezdyError::ApiError(_) | RezdyError::Deserialize { .. } => {
            false
        }
    }
}

/// Runs `operation` with up to `max_retries` additional attempts on
/// transient errors.
///
/// Back-off schedule with `backoff_base_ms = 500`:
///
/// | Retry | Sleep before it               |
/// |-------|-------------------------------|
/// | 1     | 500 ms × 2⁰ ± 25 % jitter     |
/// | 2     | 500 ms × 2¹ ± 25 % jitter     |
///
/// A `Retry-After` hint on a 429 replaces the computed delay when longer.
/// Delay is capped at 30 s.
pub(crate) async fn retry_with_backoff<T, F, Fut>(
    max_retries: u32,
    backoff_base_ms: u64,
    mut operation: F,
) -> Result<T, RezdyError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RezdyError>>,
{
    const MAX_DELAY_MS: u64 = 30_000;
    let mut attempt = 0u32;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if !is_retriable(&err) || attempt >= max_retries {
                    return Err(err);
                }
                attempt += 1;
                let computed = backoff_base_ms.saturating_mul(1u64 << (attempt - 1).min(10));
                let capped = computed.min(MAX_DELAY_MS);
                #[allow(
                    clippy::cast_possible_truncation,
                    clippy::cast_sign_loss,
                    clippy::cast_precision_loss
                )]
                let jittered = (capped as f64 * (rand::random::<f64>() * 0.5 + 0.75)) as u64;
                let delay_ms = match &err {
                    RezdyError::RateLimited {
                        retry_after_secs: Some(secs),
                    } => jittered.max(secs.saturating_mul(1_000)).min(MAX_DELAY_MS),
                    _ => jittered,
                };
                tracing::warn!(
                    attempt,
                    max_retries,
                    delay_ms,
                    error = %err,
                    "Rezdy transient error, retrying after back-off"
                );
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn not_found_is_not_retriable() {
        assert!(!is_retriable(&RezdyError::NotFound {
            product_code: "PX".to_owned()
        }));
    }

    #[test]
    fn api_error_is_not_retriable() {
        assert!(!is_retriable(&RezdyError::ApiError("bad key".to_owned())));
    }

    #[test]
    fn rate_limit_and_server_errors_are_retriable() {
        assert!(is_retriable(&RezdyError::RateLimited {
            retry_after_secs: None
        }));
        assert!(is_retriable(&RezdyError::UnexpectedStatus {
            status: 503,
            url: "http://x".to_owned()
        }));
        assert!(!is_retriable(&RezdyError::UnexpectedStatus {
            status: 400,
            url: "http://x".to_owned()
        }));
    }

    #[tokio::test]
    async fn does_not_retry_not_found() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let result = retry_with_backoff(3, 0, || {
            let c = Arc::clone(&c);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err::<u32, _>(RezdyError::NotFound {
                    product_code: "PX".to_owned(),
                })
            }
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1, "NotFound must not be retried");
        assert!(matches!(result, Err(RezdyError::NotFound { .. })));
    }

    #[tokio::test]
    async fn retries_rate_limit_then_succeeds() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let result = retry_with_backoff(2, 0, || {
            let c = Arc::clone(&c);
            async move {
                let attempt = c.fetch_add(1, Ordering::SeqCst) + 1;
                if attempt < 3 {
                    Err::<u32, _>(RezdyError::RateLimited {
                        retry_after_secs: None,
                    })
                } else {
                    Ok(7)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn stops_after_max_retries() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let result = retry_with_backoff(2, 0, || {
            let c = Arc::clone(&c);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err::<u32, _>(RezdyError::UnexpectedStatus {
                    status: 502,
                    url: "http://x".to_owned(),
                })
            }
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 3, "1 attempt + 2 retries");
        assert!(result.is_err());
    }
}
