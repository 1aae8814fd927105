//! Retry mechanisms for transient failures
//!
//! Single credential-store writes and other one-shot operations are retried
//! with exponential backoff when the error is recoverable. Errors that are not
//! recoverable (validation, provider rejections) are returned immediately.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;
use tracing::{debug, error, warn};

use crate::error::FleetResult;

/// Configuration for retry behavior
///
/// # Examples
///
/// ```rust
/// use voicefleet_core::recovery::RetryConfig;
/// use std::time::Duration;
///
/// let config = RetryConfig::default();
/// assert_eq!(config.max_attempts, 3);
/// assert_eq!(config.initial_delay, Duration::from_millis(100));
///
/// let tests = RetryConfig::immediate(2);
/// assert_eq!(tests.initial_delay, Duration::ZERO);
/// ```
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, the first one included
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub initial_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
    /// Whether to add up to 10% random jitter to delays
    pub use_jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
            use_jitter: true,
        }
    }
}

impl RetryConfig {
    /// Short delays for local operations such as store writes
    pub fn quick() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(2),
            backoff_multiplier: 1.5,
            use_jitter: true,
        }
    }

    /// Retry without waiting between attempts
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            use_jitter: false,
        }
    }
}

/// Execute an async operation, retrying recoverable failures
///
/// The operation runs at most `config.max_attempts` times. Non-recoverable
/// errors are returned without retrying.
pub async fn retry_with_backoff<T, F, Fut>(
    operation_name: &str,
    config: RetryConfig,
    mut operation: F,
) -> FleetResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = FleetResult<T>>,
{
    let mut attempt = 0;
    let mut delay = config.initial_delay;

    loop {
        attempt += 1;
        debug!(operation = operation_name, attempt, "Attempting operation");

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    debug!(operation = operation_name, attempt, "Operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) if e.is_recoverable() && attempt < config.max_attempts => {
                warn!(
                    operation = operation_name,
                    attempt,
                    error = %e,
                    retry_in_ms = delay.as_millis() as u64,
                    "Operation failed, retrying"
                );

                let actual_delay = if config.use_jitter && !delay.is_zero() {
                    let jitter = rand::thread_rng().gen_range(0.0..0.1);
                    let millis = delay.as_millis() as f64;
                    Duration::from_millis((millis * (1.0 + jitter)) as u64)
                } else {
                    delay
                };

                if !actual_delay.is_zero() {
                    sleep(actual_delay).await;
                }

                let next_delay_ms = (delay.as_millis() as f64 * config.backoff_multiplier) as u64;
                delay = Duration::from_millis(next_delay_ms).min(config.max_delay);
            }
            Err(e) => {
                if e.is_recoverable() {
                    error!(
                        operation = operation_name,
                        attempts = attempt,
                        error = %e,
                        "Operation failed after all retry attempts"
                    );
                } else {
                    debug!(
                        operation = operation_name,
                        error = %e,
                        category = e.category(),
                        "Non-recoverable error, not retrying"
                    );
                }
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FleetError;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_retry_until_success() {
        let attempts = AtomicU32::new(0);

        let result = retry_with_backoff("save", RetryConfig::immediate(3), || async {
            let current = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if current < 3 {
                Err(FleetError::storage("database is locked"))
            } else {
                Ok(7)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let attempts = AtomicU32::new(0);

        let result: FleetResult<()> = retry_with_backoff("save", RetryConfig::immediate(2), || async {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(FleetError::storage("disk full"))
        })
        .await;

        assert!(matches!(result, Err(FleetError::Storage { .. })));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_non_recoverable_not_retried() {
        let attempts = AtomicU32::new(0);

        let result: FleetResult<()> = retry_with_backoff("add", RetryConfig::immediate(5), || async {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(FleetError::session_exists("acc1"))
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
