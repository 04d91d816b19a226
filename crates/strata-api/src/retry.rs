//! Bounded exponential backoff for transient infrastructure errors.
//!
//! Only errors the taxonomy marks transient are retried; everything
//! else surfaces to the caller on the first attempt.

use std::future::Future;
use std::time::Duration;

use strata_core::config::RetryConfig;
use strata_core::Result;

/// Run `attempt` up to `policy.max_attempts` times, sleeping between
/// transient failures with exponential backoff capped at
/// `policy.max_delay_ms`.
pub async fn with_backoff<T, F, Fut>(
    policy: &RetryConfig,
    operation: &'static str,
    mut attempt: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut delay = Duration::from_millis(policy.base_delay_ms);
    let max_delay = Duration::from_millis(policy.max_delay_ms);

    for tried in 1..=policy.max_attempts.max(1) {
        match attempt().await {
            Err(e) if e.is_transient() && tried < policy.max_attempts => {
                tracing::warn!(
                    operation,
                    attempt = tried,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Transient failure, backing off"
                );
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(max_delay);
            }
            other => return other,
        }
    }
    unreachable!("loop returns on the final attempt")
}
