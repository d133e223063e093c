//! Fixed-delay retry policy for API requests.

use std::collections::BTreeSet;
use std::time::Duration;

/// Retry configuration applied to every GET issued by the API client.
///
/// Total attempts per request are `max_retries + 1`.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of retries after the first attempt
    pub max_retries: u32,
    /// Delay between attempts (not exponential)
    pub backoff: Duration,
    /// HTTP statuses that trigger a retry
    pub retry_on_status: BTreeSet<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_retries: 3,
            backoff: Duration::from_secs(30),
            retry_on_status: BTreeSet::from([429, 500]),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff: Duration, retry_on_status: BTreeSet<u16>) -> Self {
        RetryPolicy {
            max_retries,
            backoff,
            retry_on_status,
        }
    }

    /// Same policy without any wait between attempts.
    pub fn without_backoff(mut self) -> Self {
        self.backoff = Duration::ZERO;
        self
    }

    pub fn should_retry_status(&self, status: u16) -> bool {
        self.retry_on_status.contains(&status)
    }

    /// Whether another attempt is allowed after `attempt` (1-based) failed.
    pub fn can_retry_after(&self, attempt: u32) -> bool {
        attempt <= self.max_retries
    }
}
