//! Exponential backoff schedule

use chrono::{DateTime, Utc};
use std::time::Duration;

/// `delay(n) = base * 2^n`, capped at `max_delay`.
///
/// An item whose retry count goes above `max_retries` is exhausted and
/// leaves the retry queue for the dead-letter log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Delay before the first retry
    pub base: Duration,
    /// Upper bound on any single delay
    pub max_delay: Duration,
    /// Retries allowed before promotion
    pub max_retries: u32,
}

impl BackoffPolicy {
    /// Create a policy
    #[inline]
    #[must_use]
    pub fn new(base: Duration, max_delay: Duration, max_retries: u32) -> Self {
        Self {
            base,
            max_delay,
            max_retries,
        }
    }

    /// Delay before the attempt made at `retry_count`
    #[must_use]
    pub fn delay(&self, retry_count: u32) -> Duration {
        let factor = 1u32.checked_shl(retry_count).unwrap_or(u32::MAX);
        self.base
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Instant of the attempt made at `retry_count`, counted from `now`
    #[must_use]
    pub fn next_attempt(&self, now: DateTime<Utc>, retry_count: u32) -> DateTime<Utc> {
        chrono::Duration::from_std(self.delay(retry_count))
            .ok()
            .and_then(|delay| now.checked_add_signed(delay))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Check if `retry_count` has gone past the retry budget
    #[inline]
    #[must_use]
    pub fn is_exhausted(&self, retry_count: u32) -> bool {
        retry_count > self.max_retries
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            max_delay: Duration::from_secs(300),
            max_retries: 3,
        }
    }
}
