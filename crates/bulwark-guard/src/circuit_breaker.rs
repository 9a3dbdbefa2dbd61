//! Circuit breaker state machine
//!
//! ```text
//! CLOSED    --(failure_count >= failure_threshold)--> OPEN
//! OPEN      --(reset_timeout elapsed, on next call)--> HALF_OPEN
//! HALF_OPEN --(success_count >= success_threshold)--> CLOSED
//! HALF_OPEN --(any failure)-->                         OPEN
//! ```
//!
//! The breaker is a plain value; [`ExecutionGuard`](crate::ExecutionGuard)
//! owns one per operation name behind a lock and never holds that lock
//! across an await.

use crate::error::GuardConfigError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

/// Breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Calls flow through
    Closed,
    /// Calls fail fast
    Open,
    /// Probe calls allowed; successes close, a failure re-opens
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => f.write_str("CLOSED"),
            Self::Open => f.write_str("OPEN"),
            Self::HalfOpen => f.write_str("HALF_OPEN"),
        }
    }
}

/// Circuit breaker configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening
    pub failure_threshold: u32,
    /// Successes in HALF_OPEN before closing
    pub success_threshold: u32,
    /// How long OPEN must last before a probe is admitted
    #[serde(with = "bulwark_core::serde_ms", rename = "reset_timeout_ms")]
    pub reset_timeout: Duration,
    /// Observation window reported alongside breaker state; not enforced
    #[serde(with = "bulwark_core::serde_ms", rename = "monitoring_period_ms")]
    pub monitoring_period: Duration,
    /// Call timeout the caller is expected to enforce; not enforced here
    #[serde(
        default,
        with = "optional_ms",
        rename = "timeout_ms",
        skip_serializing_if = "Option::is_none"
    )]
    pub timeout: Option<Duration>,
}

impl CircuitBreakerConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With failure threshold
    #[inline]
    #[must_use]
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// With success threshold for closing from HALF_OPEN
    #[inline]
    #[must_use]
    pub fn with_success_threshold(mut self, threshold: u32) -> Self {
        self.success_threshold = threshold;
        self
    }

    /// With reset timeout
    #[inline]
    #[must_use]
    pub fn with_reset_timeout(mut self, timeout: Duration) -> Self {
        self.reset_timeout = timeout;
        self
    }

    /// Check invariants
    ///
    /// # Errors
    /// Returns the first violated invariant.
    pub fn validate(&self) -> Result<(), GuardConfigError> {
        if self.failure_threshold == 0 {
            return Err(GuardConfigError::ZeroFailureThreshold);
        }
        if self.success_threshold == 0 {
            return Err(GuardConfigError::ZeroSuccessThreshold);
        }
        Ok(())
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 3,
            reset_timeout: Duration::from_millis(60_000),
            monitoring_period: Duration::from_millis(60_000),
            timeout: None,
        }
    }
}

mod optional_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub(super) fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => bulwark_core::serde_ms::serialize(d, serializer),
            None => serializer.serialize_none(),
        }
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}

/// Result of asking the breaker to admit a call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Call may proceed
    Allowed,
    /// Breaker moved OPEN -> HALF_OPEN; call proceeds as a probe
    Probe,
    /// Breaker is OPEN; fail fast
    Rejected {
        /// Time until a probe will be admitted
        retry_in: Duration,
    },
}

/// State change produced by a breaker update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    /// Previous state
    pub from: CircuitState,
    /// New state
    pub to: CircuitState,
}

/// Serializable breaker view
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerSnapshot {
    /// Current state
    pub state: CircuitState,
    /// Consecutive failures
    pub failure_count: u32,
    /// Successes since entering HALF_OPEN
    pub success_count: u32,
    /// Wall-clock time of the last failure
    pub last_failure_time: Option<DateTime<Utc>>,
    /// Times this breaker has opened
    pub times_opened: u64,
}

/// Per-operation circuit breaker
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure: Option<Instant>,
    last_failure_at: Option<DateTime<Utc>>,
    times_opened: u64,
}

impl CircuitBreaker {
    /// Create a CLOSED breaker
    #[inline]
    #[must_use]
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            last_failure: None,
            last_failure_at: None,
            times_opened: 0,
        }
    }

    /// Current state
    #[inline]
    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.state
    }

    /// Consecutive failures
    #[inline]
    #[must_use]
    pub fn failure_count(&self) -> u32 {
        self.failure_count
    }

    /// Successes since entering HALF_OPEN
    #[inline]
    #[must_use]
    pub fn success_count(&self) -> u32 {
        self.success_count
    }

    /// Configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Decide whether a call may proceed at `now`
    ///
    /// An OPEN breaker rejects while `now - last_failure <= reset_timeout`
    /// and otherwise moves to HALF_OPEN with a zeroed success count.
    pub fn try_acquire(&mut self, now: Instant) -> Admission {
        if self.state != CircuitState::Open {
            return Admission::Allowed;
        }

        let elapsed = self
            .last_failure
            .map_or(Duration::MAX, |at| now.saturating_duration_since(at));

        if elapsed <= self.config.reset_timeout {
            return Admission::Rejected {
                retry_in: self.config.reset_timeout - elapsed,
            };
        }

        self.state = CircuitState::HalfOpen;
        self.success_count = 0;
        Admission::Probe
    }

    /// Record a successful call
    pub fn record_success(&mut self) -> Option<Transition> {
        self.failure_count = 0;
        if self.state != CircuitState::HalfOpen {
            return None;
        }

        self.success_count += 1;
        if self.success_count >= self.config.success_threshold {
            self.state = CircuitState::Closed;
            self.success_count = 0;
            return Some(Transition {
                from: CircuitState::HalfOpen,
                to: CircuitState::Closed,
            });
        }
        None
    }

    /// Record a failed call at `now`
    pub fn record_failure(&mut self, now: Instant) -> Option<Transition> {
        self.failure_count = self.failure_count.saturating_add(1);
        self.last_failure = Some(now);
        self.last_failure_at = Some(Utc::now());

        let from = self.state;
        let should_open = from == CircuitState::HalfOpen
            || self.failure_count >= self.config.failure_threshold;

        if should_open && from != CircuitState::Open {
            self.state = CircuitState::Open;
            self.success_count = 0;
            self.times_opened += 1;
            return Some(Transition {
                from,
                to: CircuitState::Open,
            });
        }
        None
    }

    /// Snapshot for reporting
    #[must_use]
    pub fn snapshot(&self) -> CircuitBreakerSnapshot {
        CircuitBreakerSnapshot {
            state: self.state,
            failure_count: self.failure_count,
            success_count: self.success_count,
            last_failure_time: self.last_failure_at,
            times_opened: self.times_opened,
        }
    }
}
