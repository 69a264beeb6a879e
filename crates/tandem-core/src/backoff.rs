//! Exponential backoff for background reconciliation

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Consecutive failed passes before the reconciler starts warning
    pub max_attempts: u32,
    /// Initial delay between retries in milliseconds
    pub initial_delay_ms: u64,
    /// Maximum delay between retries in milliseconds
    pub max_delay_ms: u64,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
    /// Jitter factor to randomize delays
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay_ms: 500,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

impl RetryPolicy {
    /// Create a policy for quick retries
    pub fn quick() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 50,
            max_delay_ms: 1_000,
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }

    /// Create a policy for slow retries
    pub fn slow() -> Self {
        Self {
            max_attempts: 10,
            initial_delay_ms: 2_000,
            max_delay_ms: 120_000,
            backoff_multiplier: 2.0,
            jitter_factor: 0.2,
        }
    }

    /// Validate the policy
    pub fn validate(&self) -> Result<(), String> {
        if self.initial_delay_ms == 0 {
            return Err("retry.initial_delay_ms must be > 0".to_string());
        }
        if self.max_delay_ms < self.initial_delay_ms {
            return Err("retry.max_delay_ms must be >= retry.initial_delay_ms".to_string());
        }
        if self.backoff_multiplier < 1.0 {
            return Err("retry.backoff_multiplier must be >= 1.0".to_string());
        }
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err("retry.jitter_factor must be between 0.0 and 1.0".to_string());
        }
        Ok(())
    }

    /// Delay before retry number `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        calculate_delay(self, attempt)
    }
}

/// Calculate delay with exponential backoff and jitter
fn calculate_delay(policy: &RetryPolicy, attempt: u32) -> Duration {
    let initial = Duration::from_millis(policy.initial_delay_ms).as_nanos() as f64;
    let max = Duration::from_millis(policy.max_delay_ms).as_nanos() as f64;
    let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;

    let base_delay = (initial * policy.backoff_multiplier.powi(exponent)).min(max);

    let jitter_range = base_delay * policy.jitter_factor;
    let jitter = (rand::random::<f64>() - 0.5) * 2.0 * jitter_range;

    let final_delay = (base_delay + jitter).clamp(0.0, max) as u64;

    Duration::from_nanos(final_delay)
}

/// Stateful backoff over consecutive failures
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: RetryPolicy,
    attempt: u32,
}

impl Backoff {
    /// Create a new backoff
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy, attempt: 0 }
    }

    /// Record a failure and return the delay before the next try
    pub fn next_delay(&mut self) -> Duration {
        self.attempt = self.attempt.saturating_add(1);
        calculate_delay(&self.policy, self.attempt)
    }

    /// Consecutive failures recorded since the last reset
    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    /// Check whether consecutive failures reached `max_attempts`
    pub fn exhausted(&self) -> bool {
        self.attempt >= self.policy.max_attempts
    }

    /// Forget previous failures
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}
