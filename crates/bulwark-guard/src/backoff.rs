//! Retry backoff policy
//!
//! `delay(attempt) = min(max_delay, base_delay * exponential_base^(attempt - 1))`,
//! optionally perturbed by uniform ±25% jitter and floored at zero.

use crate::error::GuardConfigError;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Fraction of the capped delay that jitter may add or remove
pub const JITTER_FRACTION: f64 = 0.25;

/// Retry configuration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts including the first call
    pub max_attempts: u32,
    /// Delay before the first retry
    #[serde(with = "bulwark_core::serde_ms", rename = "base_delay_ms")]
    pub base_delay: Duration,
    /// Upper bound on the un-jittered delay
    #[serde(with = "bulwark_core::serde_ms", rename = "max_delay_ms")]
    pub max_delay: Duration,
    /// Growth factor between attempts
    pub exponential_base: f64,
    /// Apply ±25% uniform jitter
    pub jitter: bool,
}

impl RetryConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With max attempts
    #[inline]
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// With base delay
    #[inline]
    #[must_use]
    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    /// With max delay
    #[inline]
    #[must_use]
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// With exponential base
    #[inline]
    #[must_use]
    pub fn with_exponential_base(mut self, base: f64) -> Self {
        self.exponential_base = base;
        self
    }

    /// With or without jitter
    #[inline]
    #[must_use]
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Check invariants
    ///
    /// # Errors
    /// Returns the first violated invariant.
    pub fn validate(&self) -> Result<(), GuardConfigError> {
        if self.max_attempts == 0 {
            return Err(GuardConfigError::ZeroAttempts);
        }
        if self.exponential_base.is_nan() || self.exponential_base <= 1.0 {
            return Err(GuardConfigError::ExponentialBase(self.exponential_base));
        }
        if self.base_delay > self.max_delay {
            return Err(GuardConfigError::DelayBounds {
                base_ms: self.base_delay.as_millis(),
                max_ms: self.max_delay.as_millis(),
            });
        }
        Ok(())
    }

    /// Un-jittered delay before retrying after `attempt` (1-based)
    #[must_use]
    pub fn capped_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let max_ms = self.max_delay.as_secs_f64() * 1000.0;
        let raw_ms = self.base_delay.as_secs_f64() * 1000.0 * self.exponential_base.powi(exponent);
        let ms = if raw_ms.is_finite() { raw_ms.min(max_ms) } else { max_ms };
        millis(ms)
    }

    /// Delay before retrying after `attempt` (1-based), jitter included
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let capped = self.capped_delay(attempt);
        if self.jitter {
            let unit = rand::rng().random_range(-1.0..=1.0);
            apply_jitter(capped, unit)
        } else {
            capped
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
            exponential_base: 2.0,
            jitter: true,
        }
    }
}

/// Perturb `delay` by `unit * 25%`, where `unit` is in `[-1, 1]`
fn apply_jitter(delay: Duration, unit: f64) -> Duration {
    let ms = delay.as_secs_f64() * 1000.0;
    let offset = ms * JITTER_FRACTION * unit.clamp(-1.0, 1.0);
    millis(ms + offset)
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn millis(ms: f64) -> Duration {
    Duration::from_millis(ms.max(0.0).round() as u64)
}
