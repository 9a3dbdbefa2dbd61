//! Service registry entries

use crate::error::DegradationError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Service availability, ordered by severity
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServiceStatus {
    /// Serving normally
    #[default]
    Available,
    /// Serving with failures
    Degraded,
    /// Not serving
    Unavailable,
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Available => "AVAILABLE",
            Self::Degraded => "DEGRADED",
            Self::Unavailable => "UNAVAILABLE",
        })
    }
}

/// Registration parameters for a service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Service name
    pub name: String,
    /// Essential services degrade instead of going unavailable
    #[serde(default)]
    pub essential: bool,
    /// Whether a fallback exists for this service
    #[serde(default)]
    pub fallback_available: bool,
    /// Consecutive failures before degrading
    #[serde(default = "default_degradation_threshold")]
    pub degradation_threshold: u32,
    /// Consecutive successes before recovering
    #[serde(default = "default_recovery_threshold")]
    pub recovery_threshold: u32,
}

fn default_degradation_threshold() -> u32 {
    3
}

fn default_recovery_threshold() -> u32 {
    2
}

impl ServiceConfig {
    /// Non-essential service with default thresholds
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            essential: false,
            fallback_available: false,
            degradation_threshold: default_degradation_threshold(),
            recovery_threshold: default_recovery_threshold(),
        }
    }

    /// Mark essential
    #[inline]
    #[must_use]
    pub fn essential(mut self) -> Self {
        self.essential = true;
        self
    }

    /// Mark as having a fallback
    #[inline]
    #[must_use]
    pub fn with_fallback_available(mut self) -> Self {
        self.fallback_available = true;
        self
    }

    /// With degradation threshold
    #[inline]
    #[must_use]
    pub fn with_degradation_threshold(mut self, threshold: u32) -> Self {
        self.degradation_threshold = threshold;
        self
    }

    /// With recovery threshold
    #[inline]
    #[must_use]
    pub fn with_recovery_threshold(mut self, threshold: u32) -> Self {
        self.recovery_threshold = threshold;
        self
    }

    /// Check invariants
    ///
    /// # Errors
    /// [`DegradationError::InvalidService`] for an empty name or a zero
    /// threshold.
    pub fn validate(&self) -> Result<(), DegradationError> {
        let reason = if self.name.trim().is_empty() {
            "name must not be empty"
        } else if self.degradation_threshold == 0 {
            "degradation_threshold must be at least 1"
        } else if self.recovery_threshold == 0 {
            "recovery_threshold must be at least 1"
        } else {
            return Ok(());
        };
        Err(DegradationError::InvalidService {
            name: self.name.clone(),
            reason,
        })
    }
}

/// Runtime state of a registered service
///
/// At most one of the two consecutive counters is non-zero.
#[derive(Debug, Clone)]
pub(crate) struct ServiceState {
    pub(crate) config: ServiceConfig,
    pub(crate) status: ServiceStatus,
    pub(crate) consecutive_failures: u32,
    pub(crate) consecutive_successes: u32,
    pub(crate) total_requests: u64,
    pub(crate) average_latency: Option<Duration>,
    latency_samples: u64,
    pub(crate) last_status_change: Option<DateTime<Utc>>,
}

impl ServiceState {
    pub(crate) fn new(config: ServiceConfig) -> Self {
        Self {
            config,
            status: ServiceStatus::Available,
            consecutive_failures: 0,
            consecutive_successes: 0,
            total_requests: 0,
            average_latency: None,
            latency_samples: 0,
            last_status_change: None,
        }
    }

    /// Fold in one outcome; returns `(from, to)` if the status changed
    ///
    /// Essential services escalate from DEGRADED to UNAVAILABLE once failures
    /// reach `essential_multiplier × degradation_threshold`.
    pub(crate) fn record(
        &mut self,
        success: bool,
        latency: Option<Duration>,
        essential_multiplier: u32,
    ) -> Option<(ServiceStatus, ServiceStatus)> {
        self.total_requests += 1;
        if let Some(latency) = latency {
            self.latency_samples += 1;
            let n = self.latency_samples as f64;
            let avg = self.average_latency.unwrap_or_default().as_secs_f64();
            self.average_latency = Some(Duration::from_secs_f64(
                (avg * (n - 1.0) + latency.as_secs_f64()) / n,
            ));
        }

        let from = self.status;
        let to = if success {
            self.consecutive_failures = 0;
            self.consecutive_successes = self.consecutive_successes.saturating_add(1);
            if from != ServiceStatus::Available
                && self.consecutive_successes >= self.config.recovery_threshold
            {
                ServiceStatus::Available
            } else {
                from
            }
        } else {
            self.consecutive_successes = 0;
            self.consecutive_failures = self.consecutive_failures.saturating_add(1);
            from.max(self.failure_target(essential_multiplier))
        };

        if to == from {
            return None;
        }
        self.status = to;
        self.last_status_change = Some(Utc::now());
        Some((from, to))
    }

    fn failure_target(&self, essential_multiplier: u32) -> ServiceStatus {
        let threshold = self.config.degradation_threshold;
        let failures = self.consecutive_failures;
        if failures < threshold {
            ServiceStatus::Available
        } else if !self.config.essential {
            ServiceStatus::Unavailable
        } else if essential_multiplier > 1
            && failures >= threshold.saturating_mul(essential_multiplier)
        {
            ServiceStatus::Unavailable
        } else {
            ServiceStatus::Degraded
        }
    }

    pub(crate) fn reset(&mut self) {
        let from = self.status;
        *self = Self::new(self.config.clone());
        if from != ServiceStatus::Available {
            self.last_status_change = Some(Utc::now());
        }
    }

    pub(crate) fn summary(&self) -> ServiceSummary {
        ServiceSummary {
            name: self.config.name.clone(),
            status: self.status,
            failures: self.consecutive_failures,
            successes: self.consecutive_successes,
            essential: self.config.essential,
            fallback_available: self.config.fallback_available,
            total_requests: self.total_requests,
            average_latency_ms: self.average_latency.map(|d| d.as_secs_f64() * 1000.0),
            last_status_change: self.last_status_change,
        }
    }
}

/// Reported view of a service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceSummary {
    /// Service name
    pub name: String,
    /// Current status
    pub status: ServiceStatus,
    /// Consecutive failures
    pub failures: u32,
    /// Consecutive successes
    pub successes: u32,
    /// Essential flag
    pub essential: bool,
    /// Fallback flag
    pub fallback_available: bool,
    /// Outcomes recorded
    pub total_requests: u64,
    /// Running mean of reported latencies
    pub average_latency_ms: Option<f64>,
    /// When the status last changed
    pub last_status_change: Option<DateTime<Utc>>,
}
