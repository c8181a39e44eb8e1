//! Retry policy with exponential backoff

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Bounded retry policy applied by the tier that observed a failure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryPolicy {
    /// Retries after the first attempt (default: 2)
    pub max_retries: u32,
    /// Backoff before the first retry (default: 100ms)
    pub initial_backoff_ms: u64,
    /// Backoff ceiling (default: 2s)
    pub max_backoff_ms: u64,
    /// Growth factor between retries (default: 2.0)
    pub multiplier: f64,
    /// Scale each backoff by a random factor in [0.5, 1.0]
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_backoff_ms: 100,
            max_backoff_ms: 2_000,
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Check the policy is usable
    pub fn validate(&self) -> Result<(), String> {
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(format!(
                "retry multiplier must be >= 1.0, got {}",
                self.multiplier
            ));
        }
        if self.max_backoff_ms < self.initial_backoff_ms {
            return Err(format!(
                "max_backoff_ms ({}) is below initial_backoff_ms ({})",
                self.max_backoff_ms, self.initial_backoff_ms
            ));
        }
        Ok(())
    }

    /// Backoff before retry number `retry` (1-based), without jitter:
    /// `initial * multiplier^(retry-1)`, capped at `max_backoff_ms`.
    pub fn base_backoff(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(i32::MAX as u32) as i32;
        let millis = self.initial_backoff_ms as f64 * self.multiplier.powi(exponent);
        let capped = millis.min(self.max_backoff_ms as f64);
        Duration::from_millis(capped as u64)
    }

    /// Backoff before retry number `retry`, with jitter when enabled
    pub fn backoff(&self, retry: u32) -> Duration {
        let base = self.base_backoff(retry);
        if !self.jitter || base.is_zero() {
            return base;
        }
        let factor: f64 = rand::rng().random_range(0.5..=1.0);
        base.mul_f64(factor)
    }
}
