//! Retry logic with configurable backoff
//!
//! Download attempts are retried on transient failures (watcher timeouts,
//! vanished artifacts, failed clicks). The default policy is a fixed delay;
//! a multiplier above 1.0 turns it into exponential backoff.
//!
//! # Example
//!
//! ```no_run
//! use estat_harvest::retry::{IsRetryable, with_retry};
//! use estat_harvest::config::RetryConfig;
//!
//! #[derive(Debug)]
//! enum MyError {
//!     Transient,
//!     Permanent,
//! }
//!
//! impl std::fmt::Display for MyError {
//!     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
//!         write!(f, "{:?}", self)
//!     }
//! }
//!
//! impl IsRetryable for MyError {
//!     fn is_retryable(&self) -> bool {
//!         matches!(self, MyError::Transient)
//!     }
//! }
//!
//! # async fn example() -> Result<(), (MyError, u32)> {
//! let config = RetryConfig::default();
//! with_retry(&config, |_attempt| async {
//!     Ok::<_, MyError>(())
//! }).await?;
//! # Ok(())
//! # }
//! ```

use crate::config::RetryConfig;
use crate::error::Error;
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Trait for errors that can be classified as retryable or not
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            // Download never showed up, or showed up and was quarantined
            Error::Timeout { .. } | Error::VanishedArtifact { .. } => true,
            // Re-clicking a download link is safe to repeat
            Error::Navigation { .. } | Error::Browser(_) => true,
            Error::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::WouldBlock
            ),
            Error::Conversion(_) => false,
            Error::Config { .. } => false,
            Error::Serialization(_) => false,
            Error::Cancelled => false,
            Error::Other(_) => false,
        }
    }
}

/// Execute an async operation, retrying retryable failures
///
/// `operation` receives the 1-based attempt number. With
/// `max_retries = R` the operation runs at most `R + 1` times.
///
/// Returns the successful result together with the number of attempts made,
/// or the last error together with the number of attempts made.
pub async fn with_retry<F, Fut, T, E>(
    config: &RetryConfig,
    mut operation: F,
) -> Result<(T, u32), (E, u32)>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    let mut retries = 0;
    let mut delay = config.backoff;

    loop {
        let attempt = retries + 1;
        match operation(attempt).await {
            Ok(result) => {
                if retries > 0 {
                    tracing::info!(attempts = attempt, "Operation succeeded after retry");
                }
                return Ok((result, attempt));
            }
            Err(e) if e.is_retryable() && retries < config.max_retries => {
                retries += 1;

                tracing::warn!(
                    error = %e,
                    retry = retries,
                    max_retries = config.max_retries,
                    delay_ms = delay.as_millis(),
                    "Attempt failed, retrying"
                );

                let wait = if config.jitter { add_jitter(delay) } else { delay };
                tokio::time::sleep(wait).await;

                let next_delay =
                    Duration::from_secs_f64(delay.as_secs_f64() * config.backoff_multiplier);
                delay = next_delay.min(config.max_backoff);
            }
            Err(e) => {
                if e.is_retryable() {
                    tracing::warn!(
                        error = %e,
                        attempts = attempt,
                        "Operation failed after all retries exhausted"
                    );
                } else {
                    tracing::debug!(error = %e, "Operation failed with non-retryable error");
                }
                return Err((e, attempt));
            }
        }
    }
}

/// Add random jitter to a delay to prevent thundering herd
///
/// The actual delay will be between `delay` and `2 * delay`.
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    Duration::from_secs_f64(delay.as_secs_f64() * (1.0 + jitter_factor))
}
