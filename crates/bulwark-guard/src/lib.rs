//! Bulwark Guard - safe invocation of fallible async operations
//!
//! The [`ExecutionGuard`] wraps a caller-supplied operation with:
//! - A per-operation-name [`CircuitBreaker`] (CLOSED / OPEN / HALF_OPEN)
//! - Retry with exponential [backoff](backoff::RetryConfig) and jitter
//! - [Error classification](classifier::classify) into type, severity and
//!   retriability
//! - An optional typed [`Fallback`](bulwark_core::Fallback) run on terminal
//!   failure
//!
//! # Example
//!
//! ```rust,ignore
//! use bulwark_guard::{ExecutionGuard, RecoveryOptions, RetryConfig};
//!
//! let guard = ExecutionGuard::default();
//! let options = RecoveryOptions::new().with_retry(RetryConfig::new().with_max_attempts(3));
//! let rows = guard
//!     .execute_with_recovery("db.query", options, || async { query().await })
//!     .await?;
//! ```

#![warn(unreachable_pub)]

pub mod backoff;
pub mod circuit_breaker;
pub mod classifier;
pub mod error;
pub mod guard;

pub use backoff::RetryConfig;
pub use circuit_breaker::{
    Admission, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerSnapshot, CircuitState,
    Transition,
};
pub use classifier::{classify, Classification, ErrorType, Severity};
pub use error::{GuardConfigError, GuardError};
pub use guard::{
    ErrorRecord, ExecutionGuard, GuardConfig, GuardEvent, GuardHealthStatus, RecoveryOptions,
};
