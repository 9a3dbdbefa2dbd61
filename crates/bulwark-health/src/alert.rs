//! Alerts with per-key cooldown
//!
//! An alert is keyed by `(source, status)`. A second alert for the same key
//! within the cooldown window is dropped, not queued. Dispatch to each
//! configured channel is best effort.

use crate::types::HealthStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use ulid::Ulid;

/// Alert destination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertChannel {
    /// One line on stderr
    Console,
    /// `tracing` warning
    Log,
}

impl fmt::Display for AlertChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Console => "console",
            Self::Log => "log",
        })
    }
}

/// Raised alert
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    /// Unique id
    pub id: Ulid,
    /// Service name or `system.*` source
    pub source: String,
    /// Status that triggered it
    pub status: HealthStatus,
    /// Description
    pub message: String,
    /// When it fired
    pub timestamp: DateTime<Utc>,
    /// How far past the threshold the condition is (1 = at threshold)
    pub escalation_level: u32,
}

impl Alert {
    /// New alert stamped now
    #[must_use]
    pub fn new(
        source: impl Into<String>,
        status: HealthStatus,
        message: impl Into<String>,
        escalation_level: u32,
    ) -> Self {
        Self {
            id: Ulid::new(),
            source: source.into(),
            status,
            message: message.into(),
            timestamp: Utc::now(),
            escalation_level: escalation_level.max(1),
        }
    }
}

/// Cooldown bookkeeping and channel dispatch
#[derive(Debug)]
pub struct AlertManager {
    cooldown: Duration,
    channels: Vec<AlertChannel>,
    last_fired: HashMap<(String, HealthStatus), Instant>,
}

impl AlertManager {
    /// Create manager
    #[must_use]
    pub fn new(cooldown: Duration, channels: Vec<AlertChannel>) -> Self {
        Self {
            cooldown,
            channels,
            last_fired: HashMap::new(),
        }
    }

    /// Admit `alert` if its key is outside the cooldown window at `now`
    ///
    /// Admitted alerts are dispatched to every channel before returning.
    pub fn try_fire(&mut self, alert: &Alert, now: Instant) -> bool {
        let key = (alert.source.clone(), alert.status);
        if let Some(last) = self.last_fired.get(&key) {
            if now.saturating_duration_since(*last) < self.cooldown {
                tracing::debug!(source = %alert.source, status = %alert.status, "alert suppressed by cooldown");
                return false;
            }
        }
        self.last_fired.insert(key, now);
        self.dispatch(alert);
        true
    }

    fn dispatch(&self, alert: &Alert) {
        for channel in &self.channels {
            match channel {
                AlertChannel::Console => eprintln!(
                    "[ALERT {}] {} {} (level {}): {}",
                    alert.timestamp.format("%Y-%m-%dT%H:%M:%SZ"),
                    alert.status,
                    alert.source,
                    alert.escalation_level,
                    alert.message
                ),
                AlertChannel::Log => tracing::warn!(
                    alert_id = %alert.id,
                    source = %alert.source,
                    status = %alert.status,
                    escalation_level = alert.escalation_level,
                    "{}",
                    alert.message
                ),
            }
        }
        metrics::counter!("bulwark_alerts_total", "source" => alert.source.clone()).increment(1);
    }

    /// Forget cooldown state for a source
    pub fn clear_source(&mut self, source: &str) {
        self.last_fired.retain(|(s, _), _| s != source);
    }
}
