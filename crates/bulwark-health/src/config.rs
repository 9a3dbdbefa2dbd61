//! Health monitor configuration

use crate::alert::AlertChannel;
use crate::error::HealthError;
use crate::history::DEFAULT_HISTORY_CAPACITY;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Health monitor settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Period of the health-check loop
    #[serde(with = "bulwark_core::serde_ms", rename = "check_interval_ms")]
    pub check_interval: Duration,
    /// Period of the metrics loop
    #[serde(with = "bulwark_core::serde_ms", rename = "metrics_interval_ms")]
    pub metrics_interval: Duration,
    /// Per-probe timeout
    #[serde(with = "bulwark_core::serde_ms", rename = "probe_timeout_ms")]
    pub probe_timeout: Duration,
    /// Resident memory above which a system alert fires
    pub memory_threshold_mb: f64,
    /// Error rate (fraction) above which a system alert fires
    pub error_rate_threshold: f64,
    /// Consecutive non-healthy checks before a service alert
    pub consecutive_failure_threshold: u32,
    /// Minimum interval between alerts with the same key
    #[serde(with = "bulwark_core::serde_ms", rename = "alert_cooldown_ms")]
    pub alert_cooldown: Duration,
    /// Metrics samples kept
    pub history_capacity: usize,
    /// Alert destinations
    pub alert_channels: Vec<AlertChannel>,
}

impl HealthConfig {
    /// Create config with defaults
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With health-check period
    #[inline]
    #[must_use]
    pub fn with_check_interval(mut self, interval: Duration) -> Self {
        self.check_interval = interval;
        self
    }

    /// With metrics period
    #[inline]
    #[must_use]
    pub fn with_metrics_interval(mut self, interval: Duration) -> Self {
        self.metrics_interval = interval;
        self
    }

    /// With probe timeout
    #[inline]
    #[must_use]
    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    /// With memory threshold
    #[inline]
    #[must_use]
    pub fn with_memory_threshold_mb(mut self, mb: f64) -> Self {
        self.memory_threshold_mb = mb;
        self
    }

    /// With error-rate threshold
    #[inline]
    #[must_use]
    pub fn with_error_rate_threshold(mut self, rate: f64) -> Self {
        self.error_rate_threshold = rate;
        self
    }

    /// With consecutive-failure threshold
    #[inline]
    #[must_use]
    pub fn with_consecutive_failure_threshold(mut self, threshold: u32) -> Self {
        self.consecutive_failure_threshold = threshold;
        self
    }

    /// With alert cooldown
    #[inline]
    #[must_use]
    pub fn with_alert_cooldown(mut self, cooldown: Duration) -> Self {
        self.alert_cooldown = cooldown;
        self
    }

    /// With alert channels
    #[inline]
    #[must_use]
    pub fn with_alert_channels(mut self, channels: Vec<AlertChannel>) -> Self {
        self.alert_channels = channels;
        self
    }

    /// Check invariants
    ///
    /// # Errors
    /// Returns [`HealthError::InvalidConfig`] naming the first bad field.
    pub fn validate(&self) -> Result<(), HealthError> {
        if self.check_interval.is_zero() {
            return Err(HealthError::InvalidConfig("check_interval_ms must be positive"));
        }
        if self.metrics_interval.is_zero() {
            return Err(HealthError::InvalidConfig("metrics_interval_ms must be positive"));
        }
        if self.probe_timeout.is_zero() {
            return Err(HealthError::InvalidConfig("probe_timeout_ms must be positive"));
        }
        if self.consecutive_failure_threshold == 0 {
            return Err(HealthError::InvalidConfig(
                "consecutive_failure_threshold must be at least 1",
            ));
        }
        if !(0.0..=1.0).contains(&self.error_rate_threshold) {
            return Err(HealthError::InvalidConfig(
                "error_rate_threshold must be a fraction in [0, 1]",
            ));
        }
        if self.history_capacity == 0 {
            return Err(HealthError::InvalidConfig("history_capacity must be at least 1"));
        }
        Ok(())
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_millis(30_000),
            metrics_interval: Duration::from_millis(10_000),
            probe_timeout: Duration::from_millis(10_000),
            memory_threshold_mb: 512.0,
            error_rate_threshold: 0.05,
            consecutive_failure_threshold: 3,
            alert_cooldown: Duration::from_millis(300_000),
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            alert_channels: vec![AlertChannel::Console, AlertChannel::Log],
        }
    }
}
