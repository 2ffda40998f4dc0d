//! Retry policy for remote calls
//!
//! Exponential backoff with full jitter: the delay before attempt `n + 1` is drawn
//! uniformly from `[0, min(max_delay, base_delay * 2^n)]`.

use rand::Rng;
use std::time::Duration;

/// Bounds on retrying a single remote call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, the first one included
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Hard deadline for the whole call, sleeps included
    pub deadline: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration, deadline: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
            deadline,
        }
    }

    /// A single attempt, still bounded by the deadline
    pub fn no_retry(deadline: Duration) -> Self {
        Self::new(1, Duration::ZERO, Duration::ZERO, deadline)
    }

    /// Whether another attempt is allowed after `attempt` attempts have failed
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Upper bound of the backoff after the given (1-based) failed attempt
    pub fn delay_ceiling(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }

    /// Jittered delay to sleep after the given failed attempt
    pub fn backoff(&self, attempt: u32) -> Duration {
        let ceiling = self.delay_ceiling(attempt).as_millis() as u64;
        if ceiling == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=ceiling))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(
            5,
            Duration::from_millis(200),
            Duration::from_secs(5),
            Duration::from_secs(8),
        )
    }
}
