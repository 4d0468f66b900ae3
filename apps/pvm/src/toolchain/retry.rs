//! Bounded retry with exponential backoff.
//!
//! The policy decides *whether* and *when* to try again; it performs no I/O
//! itself beyond sleeping, so its decisions can be tested in isolation.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::errors::{PvmError, PvmResult};

/// Maximum number of attempts for a network operation.
const MAX_ATTEMPTS: u32 = 3;

/// Base delay between retries in milliseconds.
const BASE_RETRY_DELAY_MS: u64 = 1000;

/// Retry schedule for transient network failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles for each further attempt.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_ATTEMPTS,
            base_delay: Duration::from_millis(BASE_RETRY_DELAY_MS),
        }
    }
}

impl RetryPolicy {
    /// A policy that retries without waiting.
    #[cfg(test)]
    #[must_use]
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
        }
    }

    /// Whether another attempt should follow failed attempt number `attempt`
    /// (zero-based) that ended in `error`.
    #[must_use]
    pub fn should_retry(&self, attempt: u32, error: &PvmError) -> bool {
        error.is_retryable() && attempt + 1 < self.max_attempts
    }

    /// Delay before retry number `retry` (one-based).
    ///
    /// The delay doubles with each retry (1s, 2s, 4s with the default base)
    /// with +/- 25% jitter.
    #[must_use]
    pub fn delay(&self, retry: u32) -> Duration {
        let base = self.base_delay.as_millis().min(u128::from(u64::MAX));
        #[allow(clippy::cast_possible_truncation)]
        let base_delay = (base as u64).saturating_mul(2u64.saturating_pow(retry.saturating_sub(1)));
        let jitter_range = base_delay / 4;
        let jitter = if jitter_range == 0 {
            0
        } else {
            rand::rng().random_range(0..=jitter_range * 2)
        };
        Duration::from_millis(base_delay - jitter_range + jitter)
    }

    /// Runs `operation` until it succeeds, fails permanently, or the attempt
    /// budget is exhausted. The last error is returned unchanged.
    ///
    /// # Errors
    ///
    /// Returns the error of the final attempt.
    pub async fn run<T, F, Fut>(&self, what: &str, mut operation: F) -> PvmResult<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = PvmResult<T>>,
    {
        let mut attempt = 0;
        loop {
            match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(error) if self.should_retry(attempt, &error) => {
                    attempt += 1;
                    let delay = self.delay(attempt);
                    tracing::warn!(
                        %error,
                        attempt = attempt + 1,
                        max = self.max_attempts,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "{what} failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(error) => return Err(error),
            }
        }
    }
}
