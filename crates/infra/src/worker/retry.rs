//! Retry policy for transient worker failures.

use std::time::Duration;

/// Fixed-backoff retry policy.
///
/// `max_retries` counts re-attempts after the first: 2 retries means 3 total
/// attempts. Only transient errors consult this policy; permanent errors go
/// terminal immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed(2, Duration::from_secs(60))
    }
}

impl RetryPolicy {
    pub fn fixed(max_retries: u32, backoff: Duration) -> Self {
        Self {
            max_retries,
            backoff,
        }
    }

    pub fn no_retry() -> Self {
        Self::fixed(0, Duration::ZERO)
    }

    /// Whether the attempt that just failed (1-based) leaves room for
    /// another.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt <= self.max_retries
    }

    pub fn delay(&self) -> Duration {
        self.backoff
    }
}
