//! Retry policy for transient provider errors.

use rand::Rng;
use std::time::Duration;

use crate::config::ExecutionConfig;

/// Exponential backoff with jitter.
///
/// The nominal delay before retry `n` (0-based) is `base * factor^n`; jitter
/// scales it by a random factor in `[1 - jitter, 1 + jitter]`. A provider's
/// `retry_after` hint wins when it is longer.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Multiplier applied per retry.
    pub factor: f64,
    /// Relative jitter, 0.2 for ±20 %.
    pub jitter: f64,
    /// Upper bound on any single delay.
    pub max_delay: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            factor: 2.0,
            jitter: 0.2,
            max_delay: None,
        }
    }
}

impl RetryPolicy {
    /// Builds the policy from execution settings.
    #[must_use]
    pub fn from_config(config: &ExecutionConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.backoff_base_ms),
            ..Self::default()
        }
    }

    /// Disables jitter.
    #[must_use]
    pub const fn without_jitter(mut self) -> Self {
        self.jitter = 0.0;
        self
    }

    /// Caps every delay.
    #[must_use]
    pub const fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = Some(max_delay);
        self
    }

    /// Returns the delay before retry `retry` without jitter.
    #[must_use]
    pub fn nominal_delay(&self, retry: u32) -> Duration {
        let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
        self.base_delay.mul_f64(self.factor.powi(exponent))
    }

    /// Returns the delay before retry `retry` (0-based).
    #[must_use]
    pub fn delay_for(&self, retry: u32, retry_after_secs: Option<u64>) -> Duration {
        let nominal = self.nominal_delay(retry);
        let jittered = if self.jitter > 0.0 {
            let scale = rand::thread_rng().gen_range((1.0 - self.jitter)..=(1.0 + self.jitter));
            nominal.mul_f64(scale)
        } else {
            nominal
        };

        let delay = retry_after_secs
            .map(Duration::from_secs)
            .map_or(jittered, |hint| hint.max(jittered));

        self.max_delay.map_or(delay, |cap| delay.min(cap))
    }
}
