//! Bounded exponential-backoff retry for provider operations

use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::error::Result;

/// Retry policy separating retryable from fatal failures.
///
/// - Authentication and not-found failures propagate immediately.
/// - Rate-limit failures back off at `base_delay * 2^(attempt + 2)`.
/// - All other failures back off at `base_delay * 2^attempt`.
/// - After `max_retries` retries the last failure propagates to the caller.
///
/// Operations passed through this policy must tolerate repeated execution.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    /// Execute `operation`, retrying per the policy. Backoff is capped at
    /// 30 seconds per attempt.
    pub async fn execute<T, F, Fut>(&self, operation_name: &str, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt: u32 = 0;

        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) if attempt >= self.max_retries => return Err(e),
                Err(e) => {
                    let exponent = if e.is_rate_limited() {
                        attempt + 2
                    } else {
                        attempt
                    };
                    let delay = std::cmp::min(
                        self.base_delay.saturating_mul(1u32 << exponent.min(16)),
                        Duration::from_secs(30),
                    );

                    warn!(
                        "{} failed (attempt {}/{}): {}. Retrying in {:?}...",
                        operation_name,
                        attempt + 1,
                        self.max_retries + 1,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
