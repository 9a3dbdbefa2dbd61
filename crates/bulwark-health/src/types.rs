//! Health data model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Service health, ordered by severity (`Healthy` lowest)
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthStatus {
    /// Fully operational
    #[default]
    Healthy,
    /// Working with reduced quality
    Degraded,
    /// Failing
    Unhealthy,
    /// Failing hard, or the probe itself failed
    Critical,
}

impl HealthStatus {
    /// True for [`HealthStatus::Healthy`]
    #[inline]
    #[must_use]
    pub fn is_healthy(self) -> bool {
        self == Self::Healthy
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Healthy => "HEALTHY",
            Self::Degraded => "DEGRADED",
            Self::Unhealthy => "UNHEALTHY",
            Self::Critical => "CRITICAL",
        })
    }
}

/// Recorded health of one probed service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceHealth {
    /// Probe name
    pub name: String,
    /// Status from the latest check
    pub status: HealthStatus,
    /// Wall-clock time of the latest check
    pub last_check: Option<DateTime<Utc>>,
    /// Non-healthy checks since the last healthy one
    pub consecutive_failures: u32,
    /// Checks performed
    pub total_checks: u64,
    /// Non-healthy checks
    pub total_failures: u64,
    /// Running mean of probe latency
    #[serde(with = "bulwark_core::serde_ms", rename = "average_latency_ms")]
    pub average_latency: Duration,
    /// Message from the latest non-healthy check
    pub last_error: Option<String>,
    /// Metadata reported by the latest check
    pub metadata: BTreeMap<String, String>,
}

impl ServiceHealth {
    /// Fresh record for a newly registered probe
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: HealthStatus::Healthy,
            last_check: None,
            consecutive_failures: 0,
            total_checks: 0,
            total_failures: 0,
            average_latency: Duration::ZERO,
            last_error: None,
            metadata: BTreeMap::new(),
        }
    }

    /// Fold in one probe outcome
    ///
    /// Returns the previous status.
    pub(crate) fn record(
        &mut self,
        status: HealthStatus,
        message: Option<String>,
        metadata: BTreeMap<String, String>,
        latency: Duration,
    ) -> HealthStatus {
        self.total_checks += 1;
        let n = self.total_checks as f64;
        let avg = self.average_latency.as_secs_f64();
        self.average_latency =
            Duration::from_secs_f64(((avg * (n - 1.0)) + latency.as_secs_f64()) / n);
        self.last_check = Some(Utc::now());
        self.metadata = metadata;

        if status.is_healthy() {
            self.consecutive_failures = 0;
        } else {
            self.consecutive_failures = self.consecutive_failures.saturating_add(1);
            self.total_failures += 1;
            self.last_error = message.or_else(|| Some(status.to_string()));
        }

        std::mem::replace(&mut self.status, status)
    }
}

/// Number of services in each status bucket
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    /// Healthy services
    pub healthy: usize,
    /// Degraded services
    pub degraded: usize,
    /// Unhealthy services
    pub unhealthy: usize,
    /// Critical services
    pub critical: usize,
}

impl StatusCounts {
    /// Tally statuses
    pub fn tally<I: IntoIterator<Item = HealthStatus>>(statuses: I) -> Self {
        statuses.into_iter().fold(Self::default(), |mut counts, status| {
            match status {
                HealthStatus::Healthy => counts.healthy += 1,
                HealthStatus::Degraded => counts.degraded += 1,
                HealthStatus::Unhealthy => counts.unhealthy += 1,
                HealthStatus::Critical => counts.critical += 1,
            }
            counts
        })
    }

    /// Worst status with a non-zero count; `Healthy` when empty
    #[must_use]
    pub fn overall(&self) -> HealthStatus {
        if self.critical > 0 {
            HealthStatus::Critical
        } else if self.unhealthy > 0 {
            HealthStatus::Unhealthy
        } else if self.degraded > 0 {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }
}

/// Point-in-time process metrics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemMetricsSample {
    /// When the sample was taken
    pub timestamp: DateTime<Utc>,
    /// Resident memory in MiB
    pub memory_mb: Option<f64>,
    /// CPU usage since the previous sample
    pub cpu_percent: Option<f64>,
    /// Time since the monitor was created
    #[serde(with = "bulwark_core::serde_ms", rename = "uptime_ms")]
    pub uptime: Duration,
    /// Failed checks over all checks, across services
    pub error_rate: f64,
}

/// Snapshot returned by [`HealthMonitor::get_health_status`](crate::HealthMonitor::get_health_status)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    /// Worst service status
    pub overall: HealthStatus,
    /// Per-service records, in registration order
    pub services: Vec<ServiceHealth>,
    /// Status buckets
    pub counts: StatusCounts,
    /// Whether the periodic loops are running
    pub running: bool,
    /// Most recent metrics sample
    pub latest_metrics: Option<SystemMetricsSample>,
}
