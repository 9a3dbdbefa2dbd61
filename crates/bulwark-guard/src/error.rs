//! Error types for the execution guard

use std::time::Duration;

/// Error surfaced by [`ExecutionGuard::execute_with_recovery`](crate::ExecutionGuard::execute_with_recovery)
///
/// Callers only ever see a fast-fail from an open circuit or the original
/// error returned by their operation; fallback failures are never surfaced.
#[derive(Debug, thiserror::Error)]
pub enum GuardError<E> {
    /// Circuit is open; the operation was not attempted
    #[error("circuit breaker open for '{operation}' (retry in {}ms)", .retry_in.as_millis())]
    CircuitOpen {
        /// Guarded operation name
        operation: String,
        /// Time until the breaker admits a probe call
        retry_in: Duration,
    },

    /// The operation's own error
    #[error("{0}")]
    Operation(#[source] E),
}

impl<E> GuardError<E> {
    /// Check if this is a circuit-open fast-fail
    #[inline]
    #[must_use]
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }

    /// Borrow the operation's error, if any
    #[inline]
    #[must_use]
    pub fn operation_error(&self) -> Option<&E> {
        match self {
            Self::Operation(e) => Some(e),
            Self::CircuitOpen { .. } => None,
        }
    }

    /// Take the operation's error, if any
    #[inline]
    pub fn into_operation_error(self) -> Option<E> {
        match self {
            Self::Operation(e) => Some(e),
            Self::CircuitOpen { .. } => None,
        }
    }
}

/// Invalid retry or circuit-breaker configuration
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GuardConfigError {
    /// `max_attempts` must be at least 1
    #[error("max_attempts must be >= 1")]
    ZeroAttempts,

    /// `exponential_base` must be greater than 1
    #[error("exponential_base must be > 1 (got {0})")]
    ExponentialBase(f64),

    /// `base_delay` exceeds `max_delay`
    #[error("base_delay ({base_ms}ms) exceeds max_delay ({max_ms}ms)")]
    DelayBounds {
        /// Base delay in milliseconds
        base_ms: u128,
        /// Max delay in milliseconds
        max_ms: u128,
    },

    /// `failure_threshold` must be at least 1
    #[error("failure_threshold must be >= 1")]
    ZeroFailureThreshold,

    /// `success_threshold` must be at least 1
    #[error("success_threshold must be >= 1")]
    ZeroSuccessThreshold,
}
