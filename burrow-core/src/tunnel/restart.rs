//! Retry policy for failed tunnel starts

use std::time::Duration;

/// Exponential backoff with a retry ceiling
///
/// Retry `n` (1-based) waits `initial * 2^(n-1)`, capped at `max_backoff`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    initial_backoff: Duration,
    max_backoff: Duration,
    max_retries: u32,
}

impl RetryPolicy {
    /// Create a new retry policy
    ///
    /// - `initial_backoff`: delay before the first retry
    /// - `max_backoff`: upper bound for any single delay
    /// - `max_retries`: retries allowed before giving up
    pub fn new(initial_backoff: Duration, max_backoff: Duration, max_retries: u32) -> Self {
        Self {
            initial_backoff,
            max_backoff: max_backoff.max(initial_backoff),
            max_retries,
        }
    }

    /// Default policy: 1s doubling up to 30s, 5 retries
    pub fn default_policy() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(30), 5)
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Delay before retry number `retry` (1-based)
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(31);
        self.initial_backoff
            .checked_mul(1u32 << exponent)
            .map_or(self.max_backoff, |delay| delay.min(self.max_backoff))
    }

    /// Delay before the next retry, given how many retries already ran
    ///
    /// Returns `None` once the ceiling is reached.
    pub fn next_delay(&self, retries_so_far: u32) -> Option<Duration> {
        (retries_so_far < self.max_retries).then(|| self.delay_for(retries_so_far + 1))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::default_policy()
    }
}
