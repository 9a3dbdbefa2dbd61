//! Bulwark Health - periodic service probing and alerting
//!
//! The [`HealthMonitor`] polls registered [`HealthProbe`]s on one timer and
//! samples process metrics on another. Results feed per-service
//! [`ServiceHealth`] records; sustained failures and system thresholds raise
//! [`Alert`]s subject to a per-`(source, status)` cooldown.
//!
//! A probe never fails the monitor: errors and timeouts are recorded as
//! [`HealthStatus::Critical`].

#![warn(unreachable_pub)]

pub mod alert;
pub mod config;
pub mod error;
pub mod history;
pub mod monitor;
pub mod probe;
pub mod types;

pub use alert::{Alert, AlertChannel, AlertManager};
pub use config::HealthConfig;
pub use error::HealthError;
pub use history::MetricsHistory;
pub use monitor::{HealthEvent, HealthMonitor, ERROR_RATE_ALERT_SOURCE, MEMORY_ALERT_SOURCE};
pub use probe::{probe_fn, FnProbe, HealthProbe, ProbeResult};
pub use types::{HealthReport, HealthStatus, ServiceHealth, StatusCounts, SystemMetricsSample};
