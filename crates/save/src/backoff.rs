//! Retry budget and exponential backoff with jitter.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Retry policy configuration.
///
/// `delay(attempt) = min(base_delay * 2^attempt + jitter, max_delay)` where
/// `jitter` is drawn uniformly from `0..=max_jitter`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Consecutive failures tolerated per save cycle; reaching it ends the cycle
    pub max_retries: u32,
    /// Base delay between retries
    pub base_delay: Duration,
    /// Maximum delay cap (applies after jitter)
    pub max_delay: Duration,
    /// Upper bound of the random offset added to every delay
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(2_000),
            max_delay: Duration::from_millis(30_000),
            max_jitter: Duration::from_millis(1_000),
        }
    }
}

impl RetryPolicy {
    /// Create a policy with no retries.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Create a policy with exponential backoff and the default jitter.
    pub fn exponential(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
            ..Default::default()
        }
    }

    pub fn without_jitter(mut self) -> Self {
        self.max_jitter = Duration::ZERO;
        self
    }

    /// Delay before jitter, already capped at `max_delay`.
    pub fn base_delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis().min(u64::MAX as u128) as u64;
        let factor = 2u64.checked_pow(attempt).unwrap_or(u64::MAX);
        let delay_ms = base_ms.saturating_mul(factor);
        Duration::from_millis(delay_ms).min(self.max_delay)
    }

    /// Delay for `attempt` with an explicit jitter value (clamped to `max_jitter`).
    pub fn delay_with_jitter(&self, attempt: u32, jitter: Duration) -> Duration {
        let jitter = jitter.min(self.max_jitter);
        self.base_delay_for_attempt(attempt)
            .saturating_add(jitter)
            .min(self.max_delay)
    }

    /// Calculate delay for a given attempt number, sampling fresh jitter.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let max_jitter_ms = self.max_jitter.as_millis().min(u64::MAX as u128) as u64;
        let jitter_ms = if max_jitter_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=max_jitter_ms)
        };
        self.delay_with_jitter(attempt, Duration::from_millis(jitter_ms))
    }

    /// Whether another attempt may be scheduled after `failures` consecutive failures.
    pub fn should_retry(&self, failures: u32) -> bool {
        failures < self.max_retries
    }
}
