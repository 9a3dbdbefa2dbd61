//! Degradation controller errors

/// Errors from controller operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DegradationError {
    /// Service not registered
    #[error("unknown service '{0}'")]
    UnknownService(String),

    /// Feature not registered
    #[error("unknown feature '{0}'")]
    UnknownFeature(String),

    /// Service configuration rejected
    #[error("invalid configuration for service '{name}': {reason}")]
    InvalidService {
        /// Service name
        name: String,
        /// What is wrong
        reason: &'static str,
    },

    /// Controller configuration rejected
    #[error("invalid degradation configuration: {0}")]
    InvalidConfig(&'static str),
}

/// Errors from [`DegradationController::execute_with_fallback`](crate::DegradationController::execute_with_fallback)
#[derive(Debug, thiserror::Error)]
pub enum ExecuteError<E> {
    /// The service is UNAVAILABLE and no fallback produced a value
    #[error("service '{service}' is unavailable and no fallback succeeded")]
    ServiceUnavailable {
        /// Service name
        service: String,
    },

    /// The primary failed and no fallback produced a value
    #[error("{0}")]
    Primary(#[source] E),
}

impl<E> ExecuteError<E> {
    /// Borrow the primary's error, if any
    #[inline]
    #[must_use]
    pub fn primary_error(&self) -> Option<&E> {
        match self {
            Self::Primary(e) => Some(e),
            Self::ServiceUnavailable { .. } => None,
        }
    }

    /// True if the primary was skipped because the service is unavailable
    #[inline]
    #[must_use]
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::ServiceUnavailable { .. })
    }
}
