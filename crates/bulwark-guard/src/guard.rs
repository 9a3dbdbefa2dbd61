//! Execution guard (error recovery manager)
//!
//! Orchestrates circuit breaker, retry backoff and error classification
//! around a caller-supplied async operation.
//!
//! # Flow
//! 1. Look up or lazily create the breaker for the operation name
//! 2. OPEN within `reset_timeout`: fail fast without calling the operation
//! 3. Run up to `max_attempts` attempts; every outcome updates the breaker
//! 4. Stop retrying on a non-retriable error, on the last attempt, or once
//!    the breaker has opened
//! 5. On terminal failure, record error statistics and try the fallback; a
//!    failing fallback never masks the original error

use crate::backoff::RetryConfig;
use crate::circuit_breaker::{
    Admission, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerSnapshot, CircuitState,
    Transition,
};
use crate::classifier::{classify, ErrorType, Severity};
use crate::error::{GuardConfigError, GuardError};
use bulwark_core::{EventBus, Fallback};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::error::Error;
use std::future::Future;
use std::sync::Arc;
use tokio::time::{sleep, Instant};

/// Guard-wide defaults
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    /// Default retry policy
    pub retry: RetryConfig,
    /// Configuration for lazily created breakers
    pub circuit_breaker: CircuitBreakerConfig,
}

impl GuardConfig {
    /// Check invariants
    ///
    /// # Errors
    /// Returns the first violated invariant.
    pub fn validate(&self) -> Result<(), GuardConfigError> {
        self.retry.validate()?;
        self.circuit_breaker.validate()
    }
}

/// Per-call options
pub struct RecoveryOptions<T> {
    /// Retry policy override
    pub retry: Option<RetryConfig>,
    /// Breaker configuration used if this call creates the breaker
    pub circuit_breaker: Option<CircuitBreakerConfig>,
    /// Run the fallback on terminal failure
    pub enable_graceful_degradation: bool,
    /// Alternate path
    pub fallback: Option<Arc<dyn Fallback<T>>>,
}

impl<T> RecoveryOptions<T> {
    /// Options with guard defaults and no fallback
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            retry: None,
            circuit_breaker: None,
            enable_graceful_degradation: true,
            fallback: None,
        }
    }

    /// With retry policy
    #[inline]
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = Some(retry);
        self
    }

    /// With breaker configuration
    #[inline]
    #[must_use]
    pub fn with_circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = Some(config);
        self
    }

    /// With fallback
    #[inline]
    #[must_use]
    pub fn with_fallback(mut self, fallback: impl Fallback<T> + 'static) -> Self {
        self.fallback = Some(Arc::new(fallback));
        self
    }

    /// With shared fallback
    #[inline]
    #[must_use]
    pub fn with_shared_fallback(mut self, fallback: Arc<dyn Fallback<T>>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// Enable or disable the fallback path
    #[inline]
    #[must_use]
    pub fn with_graceful_degradation(mut self, enabled: bool) -> Self {
        self.enable_graceful_degradation = enabled;
        self
    }
}

impl<T> Default for RecoveryOptions<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for RecoveryOptions<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecoveryOptions")
            .field("retry", &self.retry)
            .field("circuit_breaker", &self.circuit_breaker)
            .field("enable_graceful_degradation", &self.enable_graceful_degradation)
            .field("fallback", &self.fallback.is_some())
            .finish()
    }
}

/// Accumulated errors for one `(operation, error_type)` pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    /// Operation name
    pub operation: String,
    /// Error category
    pub error_type: ErrorType,
    /// Terminal failures recorded
    pub count: u64,
    /// Most recent occurrence
    pub last_occurred: DateTime<Utc>,
    /// Severity of the category
    pub severity: Severity,
}

/// Guard status report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardHealthStatus {
    /// Breaker per operation name
    pub circuit_breakers: BTreeMap<String, CircuitBreakerSnapshot>,
    /// Error histogram, ordered by operation then type
    pub error_stats: Vec<ErrorRecord>,
    /// Sum of all record counts
    pub total_errors: u64,
}

/// Events published by the guard
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardEvent {
    /// A breaker changed state
    CircuitStateChanged {
        /// Operation name
        operation: String,
        /// Previous state
        from: CircuitState,
        /// New state
        to: CircuitState,
    },
    /// A fallback produced the result of a failed call
    FallbackUsed {
        /// Operation name
        operation: String,
    },
}

/// Execution guard
///
/// One breaker registry and one error histogram per instance; share it via
/// `Arc` when a process-wide registry is wanted.
#[derive(Debug)]
pub struct ExecutionGuard {
    config: GuardConfig,
    breakers: DashMap<String, Arc<Mutex<CircuitBreaker>>>,
    errors: DashMap<(String, ErrorType), ErrorRecord>,
    events: EventBus<GuardEvent>,
}

impl ExecutionGuard {
    /// Create guard with default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(GuardConfig::default())
    }

    /// Create guard with configuration
    #[must_use]
    pub fn with_config(config: GuardConfig) -> Self {
        Self {
            config,
            breakers: DashMap::new(),
            errors: DashMap::new(),
            events: EventBus::default(),
        }
    }

    /// Guard configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &GuardConfig {
        &self.config
    }

    /// Subscribe to guard events
    #[inline]
    #[must_use]
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<GuardEvent> {
        self.events.subscribe()
    }

    /// Run `operation` under circuit breaker, retry and fallback protection
    ///
    /// # Errors
    /// - `GuardError::CircuitOpen` if the breaker rejected the call and no
    ///   fallback succeeded
    /// - `GuardError::Operation` carrying the operation's last error
    pub async fn execute_with_recovery<T, E, F, Fut>(
        &self,
        operation_name: &str,
        options: RecoveryOptions<T>,
        mut operation: F,
    ) -> Result<T, GuardError<E>>
    where
        T: Send,
        E: Error + Send + Sync + 'static,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let retry = options.retry.unwrap_or(self.config.retry);
        let breaker = self.breaker(operation_name, options.circuit_breaker);

        let outcome = match self.admit(operation_name, &breaker) {
            Err(retry_in) => {
                tracing::debug!(
                    operation = %operation_name,
                    retry_in_ms = retry_in.as_millis() as u64,
                    "circuit open, failing fast"
                );
                metrics::counter!("bulwark_guard_circuit_rejections_total", "operation" => operation_name.to_string())
                    .increment(1);
                self.record_error_type(operation_name, ErrorType::Dependency);
                Err(GuardError::CircuitOpen {
                    operation: operation_name.to_string(),
                    retry_in,
                })
            }
            Ok(()) => self
                .run_attempts(operation_name, &retry, &breaker, &mut operation)
                .await
                .map_err(|e| {
                    self.record_error(operation_name, &e);
                    GuardError::Operation(e)
                }),
        };

        match outcome {
            Ok(value) => Ok(value),
            Err(err) if options.enable_graceful_degradation => match options.fallback {
                Some(fallback) => self.run_fallback(operation_name, fallback.as_ref(), err).await,
                None => Err(err),
            },
            Err(err) => Err(err),
        }
    }

    async fn run_attempts<T, E, F, Fut>(
        &self,
        operation_name: &str,
        retry: &RetryConfig,
        breaker: &Mutex<CircuitBreaker>,
        operation: &mut F,
    ) -> Result<T, E>
    where
        E: Error + 'static,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let max_attempts = retry.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            metrics::counter!("bulwark_guard_attempts_total", "operation" => operation_name.to_string())
                .increment(1);

            let error = match operation().await {
                Ok(value) => {
                    let transition = breaker.lock().record_success();
                    self.publish_transition(operation_name, transition);
                    if attempt > 1 {
                        tracing::info!(operation = %operation_name, attempt, "operation recovered after retry");
                    }
                    return Ok(value);
                }
                Err(error) => error,
            };

            let transition = breaker.lock().record_failure(Instant::now());
            self.publish_transition(operation_name, transition);

            let class = classify(&error);
            if !class.retriable {
                tracing::warn!(
                    operation = %operation_name,
                    attempt,
                    error_type = %class.error_type,
                    error = %error,
                    "non-retriable error"
                );
                return Err(error);
            }
            if attempt >= max_attempts {
                tracing::warn!(
                    operation = %operation_name,
                    attempts = attempt,
                    error_type = %class.error_type,
                    error = %error,
                    "retries exhausted"
                );
                return Err(error);
            }

            let delay = retry.delay_for_attempt(attempt);
            tracing::debug!(
                operation = %operation_name,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "retrying after backoff"
            );
            metrics::counter!("bulwark_guard_retries_total", "operation" => operation_name.to_string())
                .increment(1);
            sleep(delay).await;
        }
    }

    async fn run_fallback<T, E>(
        &self,
        operation_name: &str,
        fallback: &dyn Fallback<T>,
        original: GuardError<E>,
    ) -> Result<T, GuardError<E>>
    where
        T: Send,
        E: Error + Send + Sync + 'static,
    {
        match fallback.call().await {
            Ok(value) => {
                tracing::info!(operation = %operation_name, cause = %original, "fallback served result");
                metrics::counter!("bulwark_guard_fallback_total", "operation" => operation_name.to_string())
                    .increment(1);
                self.events.publish(GuardEvent::FallbackUsed {
                    operation: operation_name.to_string(),
                });
                Ok(value)
            }
            Err(fallback_error) => {
                tracing::warn!(
                    operation = %operation_name,
                    error = %fallback_error,
                    cause = %original,
                    "fallback failed, surfacing original error"
                );
                Err(original)
            }
        }
    }

    /// Admit a call or report time until the breaker will
    fn admit(
        &self,
        operation_name: &str,
        breaker: &Mutex<CircuitBreaker>,
    ) -> Result<(), std::time::Duration> {
        let admission = breaker.lock().try_acquire(Instant::now());
        match admission {
            Admission::Allowed => Ok(()),
            Admission::Probe => {
                tracing::info!(operation = %operation_name, "circuit half-open, probing");
                self.publish_transition(
                    operation_name,
                    Some(Transition {
                        from: CircuitState::Open,
                        to: CircuitState::HalfOpen,
                    }),
                );
                Ok(())
            }
            Admission::Rejected { retry_in } => Err(retry_in),
        }
    }

    fn breaker(
        &self,
        operation_name: &str,
        config: Option<CircuitBreakerConfig>,
    ) -> Arc<Mutex<CircuitBreaker>> {
        if let Some(existing) = self.breakers.get(operation_name) {
            return Arc::clone(existing.value());
        }
        let config = config.unwrap_or(self.config.circuit_breaker);
        Arc::clone(
            self.breakers
                .entry(operation_name.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(CircuitBreaker::new(config))))
                .value(),
        )
    }

    fn publish_transition(&self, operation_name: &str, transition: Option<Transition>) {
        let Some(Transition { from, to }) = transition else {
            return;
        };
        if to == CircuitState::Open {
            tracing::warn!(operation = %operation_name, %from, "circuit opened");
            metrics::counter!("bulwark_guard_circuit_open_total", "operation" => operation_name.to_string())
                .increment(1);
        } else {
            tracing::info!(operation = %operation_name, %from, %to, "circuit state changed");
        }
        self.events.publish(GuardEvent::CircuitStateChanged {
            operation: operation_name.to_string(),
            from,
            to,
        });
    }

    fn record_error<E: Error + 'static>(&self, operation_name: &str, error: &E) {
        self.record_error_type(operation_name, classify(error).error_type);
    }

    /// Circuit-open fast-fails land here as `Dependency`
    fn record_error_type(&self, operation_name: &str, error_type: ErrorType) {
        let now = Utc::now();
        self.errors
            .entry((operation_name.to_string(), error_type))
            .and_modify(|record| {
                record.count += 1;
                record.last_occurred = now;
            })
            .or_insert_with(|| ErrorRecord {
                operation: operation_name.to_string(),
                error_type,
                count: 1,
                last_occurred: now,
                severity: error_type.severity(),
            });
    }

    /// Breaker states and error histogram
    ///
    /// Every terminal failure is counted, including circuit-open fast-fails,
    /// which are recorded as `Dependency` errors.
    #[must_use]
    pub fn get_health_status(&self) -> GuardHealthStatus {
        let circuit_breakers = self
            .breakers
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().lock().snapshot()))
            .collect();

        let error_stats = self.error_stats();
        let total_errors = error_stats.iter().map(|r| r.count).sum();

        GuardHealthStatus {
            circuit_breakers,
            error_stats,
            total_errors,
        }
    }

    /// Recorded terminal failures, sorted by operation then error type
    #[must_use]
    pub fn error_stats(&self) -> Vec<ErrorRecord> {
        let mut records: Vec<ErrorRecord> =
            self.errors.iter().map(|entry| entry.value().clone()).collect();
        records.sort_by(|a, b| {
            a.operation
                .cmp(&b.operation)
                .then(a.error_type.cmp(&b.error_type))
        });
        records
    }

    /// Current breaker state for an operation, if one exists
    #[must_use]
    pub fn circuit_state(&self, operation_name: &str) -> Option<CircuitState> {
        self.breakers
            .get(operation_name)
            .map(|entry| entry.value().lock().state())
    }

    /// Replace an operation's breaker with a fresh CLOSED one
    ///
    /// Keeps the existing breaker's configuration. Returns `false` if no
    /// breaker existed for the name (one is created).
    pub fn reset_circuit_breaker(&self, operation_name: &str) -> bool {
        let previous = self.breakers.get(operation_name).map(|entry| {
            let cb = entry.value().lock();
            (cb.state(), *cb.config())
        });

        let (existed, config) = match previous {
            Some((state, config)) => {
                if state != CircuitState::Closed {
                    self.publish_transition(
                        operation_name,
                        Some(Transition {
                            from: state,
                            to: CircuitState::Closed,
                        }),
                    );
                }
                (true, config)
            }
            None => (false, self.config.circuit_breaker),
        };

        self.breakers.insert(
            operation_name.to_string(),
            Arc::new(Mutex::new(CircuitBreaker::new(config))),
        );
        tracing::info!(operation = %operation_name, "circuit breaker reset");
        existed
    }

    /// Drop all error statistics
    pub fn clear_error_stats(&self) {
        self.errors.clear();
    }
}

impl Default for ExecutionGuard {
    fn default() -> Self {
        Self::new()
    }
}
