//! Retry policy for failed workers.
//!
//! # Backoff Algorithm
//!
//! - The n-th consecutive failure (n >= 1) waits `initial * multiplier^(n - 1)`
//! - The delay is capped at `max_delay`
//! - Once the failure count exceeds `max_restarts` no retry is scheduled and
//!   the worker is parked until discovery confirms the camera again
//! - The failure count resets only after a process has stayed running for
//!   `stable_after`, so a process that crashes right after launch keeps
//!   backing off

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Maximum exponent to prevent overflow.
const MAX_EXPONENT: i32 = 20;

/// Retry policy for failed transcoding workers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum consecutive failures that still get an automatic retry.
    #[serde(default = "default_max_restarts")]
    pub max_restarts: u32,
    /// Delay before the first retry in milliseconds.
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    /// Maximum delay between retries in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Backoff multiplier for exponential backoff.
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    /// Uptime after which a running worker counts as recovered, in milliseconds.
    #[serde(default = "default_stable_after_ms")]
    pub stable_after_ms: u64,
}

fn default_max_restarts() -> u32 {
    5
}

fn default_initial_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    60_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_stable_after_ms() -> u64 {
    30_000
}

impl RetryPolicy {
    /// Create a new retry policy with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a retry policy with custom max restarts.
    pub fn with_max_restarts(max_restarts: u32) -> Self {
        Self {
            max_restarts,
            ..Default::default()
        }
    }

    /// Create a retry policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_restarts: 0,
            ..Default::default()
        }
    }

    /// Delay before retrying a worker that has failed `restart_count` times in a row.
    pub fn delay_for_restart(&self, restart_count: u32) -> Duration {
        if restart_count == 0 {
            return Duration::ZERO;
        }

        let exponent = (restart_count - 1).min(MAX_EXPONENT as u32) as i32;
        let base_delay = self.initial_delay_ms as f64 * self.backoff_multiplier.powi(exponent);
        let delay_ms = base_delay.min(self.max_delay_ms as f64) as u64;

        Duration::from_millis(delay_ms)
    }

    /// Check if a worker with this many consecutive failures may be retried.
    pub fn should_retry(&self, restart_count: u32) -> bool {
        restart_count <= self.max_restarts
    }

    /// Uptime after which the failure count is cleared.
    pub fn stable_after(&self) -> Duration {
        Duration::from_millis(self.stable_after_ms)
    }

    /// Get the total maximum time spent waiting before a worker is parked.
    pub fn max_total_delay(&self) -> Duration {
        (1..=self.max_restarts)
            .map(|n| self.delay_for_restart(n))
            .sum()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_restarts: default_max_restarts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            stable_after_ms: default_stable_after_ms(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_restarts, 5);
        assert_eq!(policy.initial_delay_ms, 1000);
        assert_eq!(policy.max_delay_ms, 60_000);
        assert_eq!(policy.stable_after(), Duration::from_secs(30));
    }

    #[test]
    fn test_no_retry() {
        let policy = RetryPolicy::no_retry();
        assert!(!policy.should_retry(1));
    }

    #[test]
    fn test_should_retry() {
        let policy = RetryPolicy::with_max_restarts(3);
        assert!(policy.should_retry(1));
        assert!(policy.should_retry(2));
        assert!(policy.should_retry(3));
        assert!(!policy.should_retry(4));
    }

    #[test]
    fn test_delay_calculation() {
        let policy = RetryPolicy {
            max_restarts: 5,
            initial_delay_ms: 1000,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
            ..Default::default()
        };

        assert_eq!(policy.delay_for_restart(0), Duration::ZERO);
        assert_eq!(policy.delay_for_restart(1), Duration::from_millis(1000));
        assert_eq!(policy.delay_for_restart(2), Duration::from_millis(2000));
        assert_eq!(policy.delay_for_restart(3), Duration::from_millis(4000));
        assert_eq!(policy.delay_for_restart(4), Duration::from_millis(8000));
        assert_eq!(policy.delay_for_restart(5), Duration::from_millis(16000));
    }

    #[test]
    fn test_delay_capped_and_non_decreasing() {
        let policy = RetryPolicy {
            max_restarts: 50,
            initial_delay_ms: 1000,
            max_delay_ms: 5000,
            backoff_multiplier: 2.0,
            ..Default::default()
        };

        let delays: Vec<Duration> = (1..=50).map(|n| policy.delay_for_restart(n)).collect();
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(delays[5], Duration::from_millis(5000));
        assert_eq!(*delays.last().unwrap(), Duration::from_millis(5000));
    }

    #[test]
    fn test_max_total_delay() {
        let policy = RetryPolicy {
            max_restarts: 3,
            initial_delay_ms: 100,
            max_delay_ms: 250,
            backoff_multiplier: 2.0,
            ..Default::default()
        };
        // 100 + 200 + 250
        assert_eq!(policy.max_total_delay(), Duration::from_millis(550));
    }

    #[test]
    fn test_serialization_defaults() {
        let parsed: RetryPolicy = serde_json::from_str(r#"{"max_restarts": 2}"#).unwrap();
        assert_eq!(parsed.max_restarts, 2);
        assert_eq!(parsed.initial_delay_ms, 1000);
        assert_eq!(parsed.stable_after_ms, 30_000);
    }
}
