//! Health monitor
//!
//! Two independent loops run once `start()` is called:
//! - health checks every `check_interval`: every probe runs concurrently
//!   under `probe_timeout`, then the overall status is recomputed
//! - metrics every `metrics_interval`: a process sample is appended to the
//!   bounded history and checked against the memory and error-rate
//!   thresholds
//!
//! Both loops tick once immediately. `stop()` cancels pending ticks and
//! waits for an in-flight tick to finish.

use crate::alert::{Alert, AlertManager};
use crate::config::HealthConfig;
use crate::error::HealthError;
use crate::history::MetricsHistory;
use crate::probe::{HealthProbe, ProbeResult};
use crate::types::{HealthReport, HealthStatus, ServiceHealth, StatusCounts, SystemMetricsSample};
use bulwark_core::{EventBus, ProcessSampler};
use chrono::Utc;
use futures::future::join_all;
use futures::FutureExt;
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Source name for memory threshold alerts
pub const MEMORY_ALERT_SOURCE: &str = "system.memory";
/// Source name for error-rate threshold alerts
pub const ERROR_RATE_ALERT_SOURCE: &str = "system.error_rate";

/// Events published by the health monitor
#[derive(Debug, Clone, PartialEq)]
pub enum HealthEvent {
    /// Loops started
    MonitoringStarted,
    /// Loops stopped
    MonitoringStopped,
    /// A probe finished (including timeouts and errors)
    ProbeCompleted {
        /// Probe name
        service: String,
        /// Recorded status
        status: HealthStatus,
        /// Measured latency
        latency: Duration,
    },
    /// A service's recorded status changed
    ServiceStatusChanged {
        /// Probe name
        service: String,
        /// Previous status
        from: HealthStatus,
        /// New status
        to: HealthStatus,
    },
    /// The worst status across services changed
    OverallHealthChanged {
        /// Previous overall status
        from: HealthStatus,
        /// New overall status
        to: HealthStatus,
        /// Services per status bucket
        counts: StatusCounts,
    },
    /// A metrics sample was recorded
    MetricsCollected(SystemMetricsSample),
    /// An alert passed its cooldown and was dispatched
    AlertTriggered(Alert),
}

struct Registered {
    probe: Arc<dyn HealthProbe>,
    health: ServiceHealth,
}

struct Running {
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

/// State shared with the loop tasks
struct Inner {
    config: HealthConfig,
    services: RwLock<IndexMap<String, Registered>>,
    alerts: Mutex<AlertManager>,
    history: Mutex<MetricsHistory>,
    overall: Mutex<HealthStatus>,
    sampler: ProcessSampler,
    events: EventBus<HealthEvent>,
}

/// Health monitor
pub struct HealthMonitor {
    inner: Arc<Inner>,
    running: Mutex<Option<Running>>,
}

impl HealthMonitor {
    /// Create monitor with default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(HealthConfig::default())
    }

    /// Create monitor with configuration
    #[must_use]
    pub fn with_config(config: HealthConfig) -> Self {
        let alerts = AlertManager::new(config.alert_cooldown, config.alert_channels.clone());
        let history = MetricsHistory::new(config.history_capacity);
        Self {
            inner: Arc::new(Inner {
                config,
                services: RwLock::new(IndexMap::new()),
                alerts: Mutex::new(alerts),
                history: Mutex::new(history),
                overall: Mutex::new(HealthStatus::Healthy),
                sampler: ProcessSampler::new(),
                events: EventBus::default(),
            }),
            running: Mutex::new(None),
        }
    }

    /// Monitor configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &HealthConfig {
        &self.inner.config
    }

    /// Subscribe to monitor events
    #[inline]
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<HealthEvent> {
        self.inner.events.subscribe()
    }

    /// Register a probe; replaces any probe (and its stats) under the same name
    pub fn register_health_check(&self, name: impl Into<String>, probe: impl HealthProbe + 'static) {
        let name = name.into();
        tracing::debug!(service = %name, "health check registered");
        self.inner.services.write().insert(
            name.clone(),
            Registered {
                probe: Arc::new(probe),
                health: ServiceHealth::new(name),
            },
        );
    }

    /// Remove a probe and its record
    pub fn unregister_health_check(&self, name: &str) -> bool {
        let removed = self.inner.services.write().shift_remove(name).is_some();
        if removed {
            self.inner.alerts.lock().clear_source(name);
            self.inner.refresh_overall();
        }
        removed
    }

    /// Start the periodic loops
    ///
    /// Must be called from within a tokio runtime. Returns `false` if the
    /// loops are already running.
    pub fn start(&self) -> bool {
        let mut running = self.running.lock();
        if running.is_some() {
            return false;
        }

        let (shutdown, rx) = watch::channel(false);
        let handles = vec![
            tokio::spawn(health_loop(Arc::clone(&self.inner), rx.clone())),
            tokio::spawn(metrics_loop(Arc::clone(&self.inner), rx)),
        ];
        *running = Some(Running { shutdown, handles });

        tracing::info!(
            check_interval_ms = self.inner.config.check_interval.as_millis() as u64,
            metrics_interval_ms = self.inner.config.metrics_interval.as_millis() as u64,
            "health monitoring started"
        );
        self.inner.events.publish(HealthEvent::MonitoringStarted);
        true
    }

    /// Stop the periodic loops
    ///
    /// Returns `false` if they were not running.
    pub async fn stop(&self) -> bool {
        let Some(running) = self.running.lock().take() else {
            return false;
        };

        running.shutdown.send_replace(true);
        for handle in running.handles {
            if let Err(error) = handle.await {
                tracing::error!(error = %error, "health monitor loop terminated abnormally");
            }
        }

        tracing::info!("health monitoring stopped");
        self.inner.events.publish(HealthEvent::MonitoringStopped);
        true
    }

    /// Whether the periodic loops are running
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    /// Run every probe once and recompute the overall status
    pub async fn run_health_checks(&self) -> HealthStatus {
        self.inner.run_health_checks().await
    }

    /// Run one probe now
    ///
    /// # Errors
    /// [`HealthError::UnknownService`] if no probe is registered under `name`.
    pub async fn force_health_check(&self, name: &str) -> Result<ServiceHealth, HealthError> {
        let probe = self
            .inner
            .services
            .read()
            .get(name)
            .map(|entry| Arc::clone(&entry.probe))
            .ok_or_else(|| HealthError::UnknownService(name.to_string()))?;

        let (result, latency) = self.inner.probe_once(name, probe).await;
        let health = self
            .inner
            .apply(name, result, latency)
            .ok_or_else(|| HealthError::UnknownService(name.to_string()))?;
        self.inner.refresh_overall();
        Ok(health)
    }

    /// Take a metrics sample now
    pub fn collect_metrics(&self) -> SystemMetricsSample {
        self.inner.collect_metrics()
    }

    /// Reset a service's record to a fresh HEALTHY one
    ///
    /// # Errors
    /// [`HealthError::UnknownService`] if no probe is registered under `name`.
    pub fn reset_service_stats(&self, name: &str) -> Result<(), HealthError> {
        {
            let mut services = self.inner.services.write();
            let entry = services
                .get_mut(name)
                .ok_or_else(|| HealthError::UnknownService(name.to_string()))?;
            entry.health = ServiceHealth::new(name);
        }
        self.inner.alerts.lock().clear_source(name);
        self.inner.refresh_overall();
        tracing::info!(service = %name, "service health stats reset");
        Ok(())
    }

    /// Up to `limit` most recent metrics samples, oldest first
    #[must_use]
    pub fn get_metrics_history(&self, limit: Option<usize>) -> Vec<SystemMetricsSample> {
        self.inner.history.lock().recent(limit)
    }

    /// Recorded health of one service
    #[must_use]
    pub fn service_health(&self, name: &str) -> Option<ServiceHealth> {
        self.inner
            .services
            .read()
            .get(name)
            .map(|entry| entry.health.clone())
    }

    /// Overall status as of the last check cycle
    #[must_use]
    pub fn overall_status(&self) -> HealthStatus {
        *self.inner.overall.lock()
    }

    /// Full snapshot
    #[must_use]
    pub fn get_health_status(&self) -> HealthReport {
        let services: Vec<ServiceHealth> = self
            .inner
            .services
            .read()
            .values()
            .map(|entry| entry.health.clone())
            .collect();
        let counts = StatusCounts::tally(services.iter().map(|s| s.status));

        HealthReport {
            overall: counts.overall(),
            services,
            counts,
            running: self.is_running(),
            latest_metrics: self.inner.history.lock().latest().cloned(),
        }
    }
}

impl Default for HealthMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        if let Some(running) = self.running.get_mut().take() {
            running.shutdown.send_replace(true);
        }
    }
}

impl std::fmt::Debug for HealthMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthMonitor")
            .field("config", &self.inner.config)
            .field("services", &self.inner.services.read().keys().collect::<Vec<_>>())
            .field("running", &self.is_running())
            .finish()
    }
}

impl Inner {
    async fn probe_once(&self, name: &str, probe: Arc<dyn HealthProbe>) -> (ProbeResult, Duration) {
        let started = Instant::now();
        // check() is called inside the guarded future so a panic while
        // building the probe future is caught too
        let guarded = AssertUnwindSafe(async { probe.check().await }).catch_unwind();
        let result = match tokio::time::timeout(self.config.probe_timeout, guarded).await {
            Ok(Ok(Ok(result))) => result,
            Ok(Ok(Err(error))) => {
                tracing::warn!(service = %name, error = %error, "health probe failed");
                ProbeResult::critical(format!("health check failed: {error:#}"))
            }
            Ok(Err(payload)) => {
                let reason = panic_message(payload.as_ref());
                tracing::error!(service = %name, reason = %reason, "health probe panicked");
                ProbeResult::critical(format!("health check panicked: {reason}"))
            }
            Err(_) => {
                let timeout_ms = self.config.probe_timeout.as_millis();
                tracing::warn!(service = %name, timeout_ms = timeout_ms as u64, "health probe timed out");
                ProbeResult::critical(format!("health check timed out after {timeout_ms}ms"))
            }
        };
        (result, started.elapsed())
    }

    /// Fold a probe outcome into the service record
    ///
    /// Returns `None` if the service was unregistered while its probe ran.
    fn apply(&self, name: &str, result: ProbeResult, latency: Duration) -> Option<ServiceHealth> {
        let threshold = self.config.consecutive_failure_threshold.max(1);
        let ProbeResult {
            status,
            message,
            metadata,
        } = result;

        let (health, previous) = {
            let mut services = self.services.write();
            let entry = services.get_mut(name)?;
            let previous = entry.health.record(status, message, metadata, latency);
            (entry.health.clone(), previous)
        };

        metrics::counter!(
            "bulwark_health_checks_total",
            "service" => name.to_string(),
            "status" => status.to_string()
        )
        .increment(1);
        self.events.publish(HealthEvent::ProbeCompleted {
            service: name.to_string(),
            status,
            latency,
        });

        if previous != status {
            if status.is_healthy() {
                tracing::info!(service = %name, from = %previous, "service recovered");
            } else {
                tracing::warn!(service = %name, from = %previous, to = %status, "service health changed");
            }
            self.events.publish(HealthEvent::ServiceStatusChanged {
                service: name.to_string(),
                from: previous,
                to: status,
            });
        }

        if !status.is_healthy() && health.consecutive_failures >= threshold {
            let message = format!(
                "{name} is {status} after {} consecutive failed checks: {}",
                health.consecutive_failures,
                health.last_error.as_deref().unwrap_or("no detail")
            );
            self.raise(Alert::new(
                name,
                status,
                message,
                health.consecutive_failures / threshold,
            ));
        }

        Some(health)
    }

    fn raise(&self, alert: Alert) -> bool {
        let fired = self.alerts.lock().try_fire(&alert, Instant::now());
        if fired {
            self.events.publish(HealthEvent::AlertTriggered(alert));
        }
        fired
    }

    fn refresh_overall(&self) -> HealthStatus {
        let counts = StatusCounts::tally(self.services.read().values().map(|e| e.health.status));
        let to = counts.overall();
        let from = std::mem::replace(&mut *self.overall.lock(), to);
        if from != to {
            tracing::info!(%from, %to, "overall health changed");
            self.events
                .publish(HealthEvent::OverallHealthChanged { from, to, counts });
        }
        to
    }

    async fn run_health_checks(&self) -> HealthStatus {
        let probes: Vec<(String, Arc<dyn HealthProbe>)> = self
            .services
            .read()
            .iter()
            .map(|(name, entry)| (name.clone(), Arc::clone(&entry.probe)))
            .collect();

        let outcomes = join_all(probes.into_iter().map(|(name, probe)| async move {
            let (result, latency) = self.probe_once(&name, probe).await;
            (name, result, latency)
        }))
        .await;

        for (name, result, latency) in outcomes {
            self.apply(&name, result, latency);
        }
        self.refresh_overall()
    }

    fn collect_metrics(&self) -> SystemMetricsSample {
        let process = self.sampler.sample();
        let (checks, failures) = self
            .services
            .read()
            .values()
            .fold((0u64, 0u64), |(checks, failures), entry| {
                (
                    checks + entry.health.total_checks,
                    failures + entry.health.total_failures,
                )
            });
        let error_rate = if checks == 0 {
            0.0
        } else {
            failures as f64 / checks as f64
        };

        let sample = SystemMetricsSample {
            timestamp: Utc::now(),
            memory_mb: process.memory_mb,
            cpu_percent: process.cpu_percent,
            uptime: process.uptime,
            error_rate,
        };
        self.history.lock().push(sample.clone());
        self.events
            .publish(HealthEvent::MetricsCollected(sample.clone()));

        if let Some(memory_mb) = sample.memory_mb {
            if memory_mb > self.config.memory_threshold_mb {
                self.raise(Alert::new(
                    MEMORY_ALERT_SOURCE,
                    HealthStatus::Degraded,
                    format!(
                        "resident memory {memory_mb:.1}MB exceeds {:.1}MB",
                        self.config.memory_threshold_mb
                    ),
                    1,
                ));
            }
        }
        if error_rate > self.config.error_rate_threshold {
            self.raise(Alert::new(
                ERROR_RATE_ALERT_SOURCE,
                HealthStatus::Unhealthy,
                format!(
                    "error rate {:.1}% exceeds {:.1}%",
                    error_rate * 100.0,
                    self.config.error_rate_threshold * 100.0
                ),
                1,
            ));
        }

        sample
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

async fn health_loop(inner: Arc<Inner>, mut shutdown: watch::Receiver<bool>) {
    let mut interval = tokio::time::interval(inner.config.check_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = interval.tick() => {
                let overall = inner.run_health_checks().await;
                tracing::debug!(%overall, "health check cycle complete");
            }
            _ = shutdown.changed() => break,
        }
    }
}

async fn metrics_loop(inner: Arc<Inner>, mut shutdown: watch::Receiver<bool>) {
    let mut interval = tokio::time::interval(inner.config.metrics_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = interval.tick() => {
                inner.collect_metrics();
            }
            _ = shutdown.changed() => break,
        }
    }
}
