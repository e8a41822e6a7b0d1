//! Bounded exponential backoff for transient upload failures.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry schedule for the upload pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    /// Delay after the first failure
    pub base: Duration,
    /// Upper bound for any delay
    pub cap: Duration,
    /// Consecutive failures after which the failure is reported as persistent
    pub persistent_failure_after: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(500),
            cap: Duration::from_secs(30),
            persistent_failure_after: 5,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based).
    ///
    /// `base * 2^(attempt - 1)`, capped at `cap`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let factor = 1u32 << exponent;
        self.base.saturating_mul(factor).min(self.cap)
    }

    pub fn is_persistent(&self, consecutive_failures: u32) -> bool {
        self.persistent_failure_after > 0 && consecutive_failures >= self.persistent_failure_after
    }
}
