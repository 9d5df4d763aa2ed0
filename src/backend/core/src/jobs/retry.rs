//! Retry policy for pipeline stages.
//!
//! Pure computation: exponential backoff over a fixed attempt budget.
//! Stages that must not retry (preflight) bypass this entirely.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Backoff and attempt budget shared by every retryable stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first (1 = no retry)
    pub max_attempts: u32,
    /// Delay before attempt 2; doubles on each further attempt
    #[serde(with = "humantime_serde")]
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
        }
    }

    /// Policy for stages that get exactly one attempt.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
        }
    }

    /// Whether `attempt` (1-based) is within the budget.
    pub fn permits(&self, attempt: u32) -> bool {
        attempt >= 1 && attempt <= self.max_attempts
    }

    /// Delay observed after `attempt` (1-based) fails:
    /// `base_delay * 2^(attempt - 1)`, so attempts back off 5s, 10s, 20s
    /// with the defaults.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor)
    }
}
