//! Retry mechanism with exponential backoff and jitter
//!
//! Shared by single-part transfers, multipart parts and multipart
//! completion. Only errors classified as transient (or integrity failures)
//! are retried; everything else propagates on the first attempt.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config::RetryConfig;
use crate::error::{Error, Result};

/// Result of a retried operation together with how many attempts failed
#[derive(Debug)]
pub struct Attempted<T> {
    pub result: Result<T>,
    /// Failed attempts before the final result (the final one included when
    /// `result` is an error)
    pub failed_attempts: u32,
}

/// Retry a fallible async operation with exponential backoff.
///
/// Reports the failed-attempt count alongside the result and stops waiting
/// between attempts as soon as `cancel` fires.
///
/// ```ignore
/// let attempted = retry_tracked(
///     &config,
///     Some(&cancel),
///     || client.head_object(&path),
///     is_retryable_error,
/// ).await;
/// ```
pub async fn retry_tracked<T, F, Fut, R>(
    config: &RetryConfig,
    cancel: Option<&CancellationToken>,
    mut operation: F,
    is_retryable: R,
) -> Attempted<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
    R: Fn(&Error) -> bool,
{
    let mut attempt = 0;

    loop {
        attempt += 1;

        match operation().await {
            Ok(value) => {
                return Attempted {
                    result: Ok(value),
                    failed_attempts: attempt - 1,
                };
            }
            Err(e) => {
                if attempt >= config.max_attempts || !is_retryable(&e) {
                    return Attempted {
                        result: Err(e),
                        failed_attempts: attempt,
                    };
                }

                let backoff = calculate_backoff(config, attempt);
                tracing::debug!(
                    attempt = attempt,
                    backoff_ms = backoff.as_millis(),
                    error = %e,
                    "Retrying after transient error"
                );

                match cancel {
                    Some(token) => {
                        tokio::select! {
                            _ = token.cancelled() => {
                                return Attempted {
                                    result: Err(Error::Cancelled),
                                    failed_attempts: attempt,
                                };
                            }
                            _ = tokio::time::sleep(backoff) => {}
                        }
                    }
                    None => tokio::time::sleep(backoff).await,
                }
            }
        }
    }
}

/// Calculate backoff duration with jitter
fn calculate_backoff(config: &RetryConfig, attempt: u32) -> Duration {
    // Exponential backoff: initial * 2^(attempt-1)
    let base_ms = config
        .initial_backoff_ms
        .saturating_mul(1u64 << (attempt - 1).min(10));
    let capped_ms = base_ms.min(config.max_backoff_ms);

    // Add jitter: random value between 0 and backoff
    let jitter_ms = rand_jitter(capped_ms);
    Duration::from_millis(capped_ms + jitter_ms)
}

/// Generate pseudo-random jitter without external RNG dependency
fn rand_jitter(max: u64) -> u64 {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos() as u64;
    nanos % max.max(1)
}

/// Check if an error is retryable (transient or integrity failure)
pub fn is_retryable_error(error: &Error) -> bool {
    error.is_retryable()
}
