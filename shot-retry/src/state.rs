use std::time::Duration;

use serde::Serialize;

/// Mutable retry bookkeeping owned by a [`RateLimiter`](crate::RateLimiter).
///
/// `retry_count` counts retryable failures since the last success or
/// exhaustion and drives
/// the backoff delay. The `consecutive_*` streaks feed
/// [`AdaptiveBackoff`](crate::AdaptiveBackoff).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RetryState {
    pub retry_count: u32,
    pub last_delay: Duration,
    pub consecutive_successes: u32,
    pub consecutive_failures: u32,
    pub total_requests: u64,
    pub total_retries: u64,
}

impl RetryState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count an attempt, whether or not it gets to run.
    pub fn record_request(&mut self) {
        self.total_requests = self.total_requests.saturating_add(1);
    }

    /// Count a retryable failure that will be retried.
    pub fn record_retry(&mut self) {
        self.retry_count = self.retry_count.saturating_add(1);
        self.total_retries = self.total_retries.saturating_add(1);
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
    }

    /// A call gave up after running out of retries. Breaks the success streak
    /// and ends the retry sequence, so the next call starts without backoff.
    pub fn record_exhausted(&mut self) {
        self.retry_count = 0;
        self.last_delay = Duration::ZERO;
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.consecutive_successes = 0;
    }
}
