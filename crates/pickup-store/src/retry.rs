//! Linear-backoff retry for store writes.
//!
//! Every error is treated as transient: write failures are retried until
//! `max_attempts` is reached, then the last error is returned.

use std::future::Future;
use std::time::Duration;

/// Runs `operation` up to `max_attempts` times, sleeping `delay * attempt`
/// after each failed attempt that is not the last.
///
/// | Attempt | Sleep after failure |
/// |---------|---------------------|
/// | 1       | 1 × delay           |
/// | 2       | 2 × delay           |
/// | 3 (last)| none                |
///
/// A `max_attempts` of `0` is treated as `1`.
pub(crate) async fn retry_linear<T, E, F, Fut>(
    max_attempts: u32,
    delay: Duration,
    mut operation: F,
) -> Result<T, E>
where
    E: std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 1u32;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if attempt >= max_attempts {
                    return Err(err);
                }
                let wait = delay.saturating_mul(attempt);
                tracing::warn!(
                    attempt,
                    max_attempts,
                    delay_ms = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX),
                    error = %err,
                    "store write failed, retrying after backoff"
                );
                tokio::time::sleep(wait).await;
                attempt += 1;
            }
        }
    }
}
