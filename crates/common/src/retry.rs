//! Bounded exponential backoff policy.
//!
//! Transient collaborator failures are retried a fixed number of times with
//! strictly increasing delays, then surfaced to the operator. The policy is
//! an explicit object so tests can assert the schedule instead of timing
//! sleeps.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Retry policy for transient failures.
///
/// An operation governed by this policy runs at most `max_attempts` times;
/// between consecutive attempts the caller sleeps for the next delay from
/// [`RetryPolicy::delays`]. With `multiplier > 1.0` the delay sequence is
/// strictly increasing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first (minimum 1)
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub base_delay: Duration,
    /// Factor applied to the delay after each attempt
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(2),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Create a policy, clamping degenerate inputs.
    ///
    /// `max_attempts` is raised to at least 1 and `multiplier` to at least
    /// 1.0 so the schedule is always well-formed.
    pub fn new(max_attempts: u32, base_delay: Duration, multiplier: f64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            multiplier: if multiplier < 1.0 { 1.0 } else { multiplier },
        }
    }

    /// A policy that never retries.
    pub fn no_retries() -> Self {
        Self::new(1, Duration::ZERO, 1.0)
    }

    /// The delays to sleep between attempts.
    ///
    /// Yields `max_attempts - 1` durations: none after the final attempt.
    pub fn delays(&self) -> Delays {
        Delays {
            next: self.base_delay,
            multiplier: self.multiplier,
            remaining: self.max_attempts.saturating_sub(1),
        }
    }
}

/// Iterator over inter-attempt delays. See [`RetryPolicy::delays`].
#[derive(Debug, Clone)]
pub struct Delays {
    next: Duration,
    multiplier: f64,
    remaining: u32,
}

impl Iterator for Delays {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;

        let current = self.next;
        self.next = Duration::from_secs_f64(self.next.as_secs_f64() * self.multiplier);
        Some(current)
    }
}
