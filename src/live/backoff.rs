//! Reconnect backoff policy.
//!
//! Maps the number of reconnects already scheduled to the delay before the
//! next one: `min(base * 2^attempt, max)`. No jitter is applied.

use std::time::Duration;

/// Default delay before the first reconnect (milliseconds)
pub const DEFAULT_BASE_DELAY_MS: u64 = 1_000;

/// Default upper bound on any reconnect delay (milliseconds)
pub const DEFAULT_MAX_DELAY_MS: u64 = 30_000;

/// Exponential backoff with a cap and an optional attempt limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    base: Duration,
    max: Duration,
    max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(
            Duration::from_millis(DEFAULT_BASE_DELAY_MS),
            Duration::from_millis(DEFAULT_MAX_DELAY_MS),
        )
    }
}

impl ReconnectPolicy {
    /// Create a policy with the given base and maximum delay and no attempt limit.
    ///
    /// A `max` smaller than `base` is raised to `base`.
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
            max_attempts: None,
        }
    }

    /// Stop reconnecting after `limit` consecutive scheduled attempts.
    pub fn with_max_attempts(mut self, limit: Option<u32>) -> Self {
        self.max_attempts = limit;
        self
    }

    pub fn base(&self) -> Duration {
        self.base
    }

    pub fn max(&self) -> Duration {
        self.max
    }

    pub fn max_attempts(&self) -> Option<u32> {
        self.max_attempts
    }

    /// Delay before the reconnect that follows `attempt` earlier ones.
    ///
    /// Attempt 0: base
    /// Attempt 1: base * 2
    /// Attempt n: base * 2^n, capped at max
    pub fn delay(&self, attempt: u32) -> Duration {
        // 2^32 and beyond overflow the multiplier; the cap applies long before that
        let Some(factor) = 1u32.checked_shl(attempt) else {
            return self.max;
        };
        match self.base.checked_mul(factor) {
            Some(delay) => delay.min(self.max),
            None => self.max,
        }
    }

    /// Whether `attempt` scheduled reconnects have used up the limit.
    pub fn is_exhausted(&self, attempt: u32) -> bool {
        self.max_attempts.is_some_and(|limit| attempt >= limit)
    }

    /// The first `count` delays of the schedule, in order.
    pub fn schedule(&self, count: u32) -> Vec<Duration> {
        (0..count).map(|attempt| self.delay(attempt)).collect()
    }
}
