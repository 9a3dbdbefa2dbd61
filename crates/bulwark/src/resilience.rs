//! Facade owning one guard, one monitor and one controller

use crate::config::{ConfigError, ResilienceConfig};
use bulwark_degrade::{DegradationController, DegradationError, SystemStatus};
use bulwark_guard::{ExecutionGuard, GuardError, GuardHealthStatus, RecoveryOptions};
use bulwark_health::{HealthEvent, HealthMonitor, HealthReport};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Combined status of all three components
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResilienceStatus {
    /// Breakers and error histogram
    pub guard: GuardHealthStatus,
    /// Probed services and metrics
    pub health: HealthReport,
    /// Level, services, features, actions
    pub degradation: SystemStatus,
}

/// Resilience core
///
/// Guard outcomes reported through [`Resilience::call`] and, once bridged,
/// health probe results feed the degradation controller.
pub struct Resilience {
    guard: ExecutionGuard,
    monitor: HealthMonitor,
    controller: Arc<DegradationController>,
    bridge: Mutex<Option<JoinHandle<()>>>,
}

impl Resilience {
    /// Build all components from a validated config
    ///
    /// # Errors
    /// Validation failure.
    pub fn new(config: &ResilienceConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            guard: ExecutionGuard::with_config(config.guard_config()),
            monitor: HealthMonitor::with_config(config.health.clone()),
            controller: Arc::new(DegradationController::with_config(config.degradation.clone())),
            bridge: Mutex::new(None),
        })
    }

    /// Execution guard
    #[inline]
    #[must_use]
    pub fn guard(&self) -> &ExecutionGuard {
        &self.guard
    }

    /// Health monitor
    #[inline]
    #[must_use]
    pub fn monitor(&self) -> &HealthMonitor {
        &self.monitor
    }

    /// Degradation controller
    #[inline]
    #[must_use]
    pub fn controller(&self) -> &Arc<DegradationController> {
        &self.controller
    }

    /// Run `operation` through the guard and report the primary's outcome
    ///
    /// The outcome is recorded against `service` in the controller when the
    /// service is registered there: success if any attempt succeeded,
    /// failure otherwise (a value served by a fallback still counts as a
    /// failure).
    ///
    /// # Errors
    /// Whatever [`ExecutionGuard::execute_with_recovery`] returns.
    pub async fn call<T, E, F, Fut>(
        &self,
        service: &str,
        options: RecoveryOptions<T>,
        mut operation: F,
    ) -> Result<T, GuardError<E>>
    where
        T: Send,
        E: Error + Send + Sync + 'static,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let primary_succeeded = AtomicBool::new(false);
        let started = Instant::now();

        let result = self
            .guard
            .execute_with_recovery(service, options, || {
                let attempt = operation();
                let flag = &primary_succeeded;
                async move {
                    let outcome = attempt.await;
                    if outcome.is_ok() {
                        flag.store(true, Ordering::Relaxed);
                    }
                    outcome
                }
            })
            .await;

        let success = primary_succeeded.load(Ordering::Relaxed);
        match self
            .controller
            .record_service_result(service, success, Some(started.elapsed()))
        {
            Ok(_) | Err(DegradationError::UnknownService(_)) => {}
            Err(error) => tracing::warn!(service = %service, error = %error, "outcome not recorded"),
        }
        result
    }

    /// Feed health probe results into the controller
    ///
    /// HEALTHY counts as success, anything else as failure. Results for
    /// services the controller does not know are ignored. Must be called
    /// from within a tokio runtime; returns `false` if already bridged.
    pub fn bridge_health(&self) -> bool {
        let mut bridge = self.bridge.lock();
        if bridge.is_some() {
            return false;
        }

        let mut events = self.monitor.subscribe();
        let controller = Arc::clone(&self.controller);
        *bridge = Some(tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(HealthEvent::ProbeCompleted {
                        service,
                        status,
                        latency,
                    }) => record_probe(&controller, &service, status.is_healthy(), latency),
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "health bridge lagged, probe results dropped");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }));
        true
    }

    /// Bridge health into the controller and start the monitor loops
    pub fn start(&self) -> bool {
        self.bridge_health();
        self.monitor.start()
    }

    /// Stop the monitor loops and the bridge
    pub async fn stop(&self) -> bool {
        let stopped = self.monitor.stop().await;
        if let Some(handle) = self.bridge.lock().take() {
            handle.abort();
        }
        stopped
    }

    /// Status of every component
    #[must_use]
    pub fn status(&self) -> ResilienceStatus {
        ResilienceStatus {
            guard: self.guard.get_health_status(),
            health: self.monitor.get_health_status(),
            degradation: self.controller.get_system_status(),
        }
    }
}

fn record_probe(controller: &DegradationController, service: &str, healthy: bool, latency: Duration) {
    match controller.record_service_result(service, healthy, Some(latency)) {
        Ok(_) | Err(DegradationError::UnknownService(_)) => {}
        Err(error) => tracing::warn!(service = %service, error = %error, "probe result not recorded"),
    }
}

impl Drop for Resilience {
    fn drop(&mut self) {
        if let Some(handle) = self.bridge.get_mut().take() {
            handle.abort();
        }
    }
}

impl std::fmt::Debug for Resilience {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resilience")
            .field("guard", &self.guard)
            .field("monitor", &self.monitor)
            .field("controller", &self.controller)
            .field("bridged", &self.bridge.lock().is_some())
            .finish()
    }
}
