//! Retry policy for requests whose search found nothing.
//!
//! Linear backoff with a ceiling. A request that keeps finding nothing is
//! searched again at most once per `max_delay`.

use crate::config::SchedulerSettings;

/// Linear retry policy: `base * (retry_count + 1)`, capped.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Delay before the first retry, in seconds.
    pub base_delay_secs: u64,
    /// Upper bound for any delay, in seconds.
    pub max_delay_secs: u64,
}

impl RetryPolicy {
    pub fn new(settings: &SchedulerSettings) -> Self {
        Self {
            base_delay_secs: settings.retry_base_delay.as_secs(),
            max_delay_secs: settings.retry_max_delay.as_secs(),
        }
    }

    /// Delay in seconds for a request that has already been retried
    /// `retry_count` times.
    pub fn delay_secs(&self, retry_count: u32) -> u64 {
        self.base_delay_secs
            .saturating_mul(retry_count as u64 + 1)
            .min(self.max_delay_secs)
    }

    /// Unix timestamp at which the request becomes due again.
    pub fn next_retry_at(&self, retry_count: u32, now: i64) -> i64 {
        let delay = i64::try_from(self.delay_secs(retry_count)).unwrap_or(i64::MAX);
        now.saturating_add(delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay_secs: 24 * 3600,
            max_delay_secs: 7 * 24 * 3600,
        }
    }
}
