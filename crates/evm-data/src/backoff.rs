//! Exponential-backoff retrier for remote fetches.
//!
//! Retries only transient failures ([`crate::error::FetchError::is_transient`]). The wait
//! before retry `i` is `initial_delay * 2^i`; there is no wait after the final
//! attempt. Exhaustion is reported as `None`, never as an error.

use std::future::Future;
use std::time::Duration;

use crate::error::FetchResult;

/// Attempts made when no policy is configured.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Wait before the first retry when no policy is configured.
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_secs(1);

/// Retry policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Backoff {
    max_attempts: u32,
    initial_delay: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS, DEFAULT_INITIAL_DELAY)
    }
}

impl Backoff {
    /// `max_attempts == 0` is treated as a single attempt.
    pub fn new(max_attempts: u32, initial_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn initial_delay(&self) -> Duration {
        self.initial_delay
    }

    /// Wait after failed attempt `attempt` (zero-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.initial_delay.saturating_mul(2u32.saturating_pow(attempt))
    }

    /// Runs `operation` until it succeeds, fails permanently, or runs out of
    /// attempts.
    ///
    /// `item` names what is being fetched (block number, tx hash) and is
    /// attached to every log line so dropped items can be reconstructed.
    ///
    /// # Example
    /// ```no_run
    /// # use evm_data::backoff::Backoff;
    /// # use evm_data::client::ChainClient;
    /// # async fn example(client: &impl ChainClient) {
    /// let latest = Backoff::default()
    ///     .fetch_with_backoff("latest block", || client.latest_block_number())
    ///     .await;
    /// # }
    /// ```
    pub async fn fetch_with_backoff<T, F, Fut>(&self, item: &str, mut operation: F) -> Option<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = FetchResult<T>>,
    {
        for attempt in 0..self.max_attempts {
            match operation().await {
                Ok(value) => {
                    if attempt > 0 {
                        tracing::debug!(item, attempts = attempt + 1, "fetch succeeded after retry");
                    }
                    return Some(value);
                }
                Err(e) if !e.is_transient() => {
                    tracing::warn!(
                        item,
                        attempt = attempt + 1,
                        error = %e,
                        "permanent fetch failure, not retrying"
                    );
                    return None;
                }
                Err(e) => {
                    tracing::warn!(
                        item,
                        attempt = attempt + 1,
                        max_attempts = self.max_attempts,
                        error = %e,
                        "fetch attempt failed"
                    );
                    if attempt + 1 < self.max_attempts {
                        let delay = self.delay_for(attempt);
                        tracing::debug!(item, delay_ms = delay.as_millis() as u64, "backing off");
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        tracing::error!(
            item,
            attempts = self.max_attempts,
            "fetch unavailable after exhausting retries"
        );
        None
    }
}
