//! Health monitor errors

/// Errors from health monitor operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HealthError {
    /// No probe registered under the name
    #[error("no health check registered for '{0}'")]
    UnknownService(String),

    /// Configuration invariant violated
    #[error("invalid health configuration: {0}")]
    InvalidConfig(&'static str),
}
