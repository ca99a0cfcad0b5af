//! Bounded retry policy for fallible external calls.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Fixed-delay bounded retry.
///
/// `max_attempts` counts the first try, so `max_attempts = 1` means no retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Delay between attempts
    pub delay: Duration,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            delay: Duration::from_millis(100),
            max_attempts: 1,
        }
    }
}

impl RetryPolicy {
    pub fn new(delay: Duration, max_attempts: u32) -> Self {
        Self {
            delay,
            max_attempts: max_attempts.max(1),
        }
    }

    /// A single attempt, no retries.
    pub fn none() -> Self {
        Self::default()
    }

    /// Whether another attempt is allowed after `attempt` (1-based) failed.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    pub fn is_enabled(&self) -> bool {
        self.max_attempts > 1
    }
}
