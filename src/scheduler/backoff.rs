//! Retry backoff for transiently failed tasks.
//!
//! The delay before retry `n` grows exponentially from `base_delay`, is capped
//! at `cap_delay`, and is then perturbed by a symmetric jitter so that tasks
//! which failed together do not all come back at the same instant.

use std::time::Duration;

use rand::Rng;

use crate::config::RetryConfig;

/// Exponential backoff with symmetric jitter.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound for the unjittered delay.
    pub cap_delay: Duration,
    /// Jitter ratio; 0.25 means ±25%.
    pub jitter: f64,
    /// Retryable failures allowed before a task fails permanently.
    pub max_retries: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(2),
            cap_delay: Duration::from_secs(60),
            jitter: 0.25,
            max_retries: 5,
        }
    }
}

impl From<&RetryConfig> for BackoffPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            base_delay: Duration::from_millis(config.base_delay_ms),
            cap_delay: Duration::from_millis(config.cap_delay_ms),
            jitter: config.jitter,
            max_retries: config.max_retries,
        }
    }
}

impl BackoffPolicy {
    /// Create a policy with custom values.
    pub fn new(base_delay: Duration, cap_delay: Duration, jitter: f64, max_retries: u32) -> Self {
        Self {
            base_delay,
            cap_delay,
            jitter,
            max_retries,
        }
    }

    /// `min(base * 2^(attempt-1), cap)`. Attempt 1 is the first retry.
    pub fn unjittered(&self, attempt: u32) -> Duration {
        let exponent = attempt.max(1) - 1;
        // 2^31 * base already exceeds any sane cap; saturate instead of overflowing
        let factor = 2u32.checked_pow(exponent.min(31)).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.cap_delay)
    }

    /// Delay for `attempt` with the jitter sample `unit` in `[0, 1)`.
    ///
    /// `unit = 0.5` yields the unjittered delay; the result is floored to whole
    /// milliseconds.
    pub fn delay_with(&self, attempt: u32, unit: f64) -> Duration {
        let base_ms = self.unjittered(attempt).as_millis() as f64;
        let unit = unit.clamp(0.0, 1.0);
        let factor = 1.0 + self.jitter * (2.0 * unit - 1.0);
        Duration::from_millis((base_ms * factor).max(0.0).floor() as u64)
    }

    /// Jittered delay for `attempt`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let unit: f64 = rand::rng().random();
        self.delay_with(attempt, unit)
    }
}
