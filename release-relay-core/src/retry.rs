//! Bounded retries with exponential backoff.
//!
//! Only errors for which [`RelayError::is_retryable`] holds are retried; any other
//! error is returned after the attempt that produced it. When the budget runs
//! out, the last error is returned unchanged.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::RelayError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first. Values below 1 behave as 1.
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
        }
    }

    /// Single attempt, no waiting.
    pub fn no_retry() -> Self {
        Self::new(1, Duration::ZERO)
    }
}

/// Wait before 1-indexed `attempt`: nothing before the first, then
/// `base`, `2 * base`, `4 * base`, ...
pub fn delay_before(attempt: u32, base: Duration) -> Duration {
    if attempt < 2 {
        return Duration::ZERO;
    }
    let multiplier = 2_u32.saturating_pow(attempt - 2);
    base.saturating_mul(multiplier)
}

/// Run `op` until it succeeds, fails fatally, or `policy.max_attempts` is spent.
///
/// `op` receives the 1-indexed attempt number. Each call must build its own
/// inputs from scratch (a fresh source stream for publishes).
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    mut op: F,
) -> Result<T, RelayError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, RelayError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        let wait = delay_before(attempt, policy.base_delay);
        if !wait.is_zero() {
            debug!(operation, attempt, delay_ms = wait.as_millis() as u64, "Backing off before retry");
            tokio::time::sleep(wait).await;
        }

        match op(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(operation, attempt, "Succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) if !e.is_retryable() => {
                debug!(operation, attempt, error = %e, "Non-retryable failure");
                return Err(e);
            }
            Err(e) if attempt >= max_attempts => {
                warn!(operation, attempt, error = %e, "Retry budget exhausted");
                return Err(e);
            }
            Err(e) => {
                warn!(operation, attempt, max_attempts, error = %e, "Retryable failure");
                attempt += 1;
            }
        }
    }
}
