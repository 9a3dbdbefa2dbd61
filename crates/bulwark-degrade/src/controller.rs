//! Degradation controller
//!
//! Every reported service result and every readings update re-evaluates
//! the rule set. The highest triggered level wins; on a level change the
//! active action set is cleared and the deduplicated union of all triggered
//! rules' actions is asserted again.

use crate::action::{ActionKind, DegradationAction};
use crate::config::DegradationConfig;
use crate::error::{DegradationError, ExecuteError};
use crate::feature::{FeatureState, FeatureStatus, FeatureToggle};
use crate::level::DegradationLevel;
use crate::rules::{default_rules, DegradationContext, DegradationRule, ServiceContext, SystemReadings};
use crate::service::{ServiceConfig, ServiceState, ServiceStatus, ServiceSummary};
use bulwark_core::{EventBus, Fallback, ProcessSampler};
use dashmap::DashMap;
use indexmap::{IndexMap, IndexSet};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;

/// Events published by the controller
#[derive(Debug, Clone, PartialEq)]
pub enum DegradationEvent {
    /// A service's status changed
    ServiceStatusChanged {
        /// Service name
        service: String,
        /// Previous status
        from: ServiceStatus,
        /// New status
        to: ServiceStatus,
    },
    /// The system level changed
    LevelChanged {
        /// Previous level
        from: DegradationLevel,
        /// New level
        to: DegradationLevel,
        /// Names of the rules that triggered
        triggered_rules: Vec<String>,
    },
    /// An action was asserted
    ActionExecuted(DegradationAction),
    /// Administrative reset
    SystemReset,
}

/// Snapshot returned by [`DegradationController::get_system_status`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemStatus {
    /// Current level
    pub degradation_level: DegradationLevel,
    /// Services, in registration order
    pub services: Vec<ServiceSummary>,
    /// Features, in registration order
    pub features: Vec<FeatureStatus>,
    /// Actions asserted by the current level
    pub active_actions: Vec<DegradationAction>,
    /// Services whose fallback is the active path
    pub active_fallbacks: Vec<String>,
    /// Latest host readings
    pub readings: SystemReadings,
}

#[derive(Default)]
struct State {
    services: IndexMap<String, ServiceState>,
    features: IndexMap<String, FeatureState>,
    rules: Vec<DegradationRule>,
    level: DegradationLevel,
    active_actions: IndexMap<(ActionKind, String), DegradationAction>,
    active_fallbacks: IndexSet<String>,
    readings: SystemReadings,
}

/// Graceful degradation controller
pub struct DegradationController {
    config: DegradationConfig,
    state: Mutex<State>,
    fallbacks: DashMap<String, Arc<dyn Any + Send + Sync>>,
    sampler: ProcessSampler,
    events: EventBus<DegradationEvent>,
}

impl DegradationController {
    /// Controller with default configuration and the reference rules
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(DegradationConfig::default())
    }

    /// Controller with configuration
    ///
    /// Invalid services in `config.services` are skipped with a warning; call
    /// [`DegradationConfig::validate`] first to reject them instead.
    #[must_use]
    pub fn with_config(config: DegradationConfig) -> Self {
        let mut state = State::default();
        if config.use_default_rules {
            state.rules = default_rules(&config);
        }
        for service in &config.services {
            match service.validate() {
                Ok(()) => {
                    state
                        .services
                        .insert(service.name.clone(), ServiceState::new(service.clone()));
                }
                Err(error) => tracing::warn!(error = %error, "skipping service"),
            }
        }
        for (name, toggle) in &config.features {
            state
                .features
                .insert(name.clone(), FeatureState::new(toggle.clone()));
        }

        Self {
            config,
            state: Mutex::new(state),
            fallbacks: DashMap::new(),
            sampler: ProcessSampler::new(),
            events: EventBus::default(),
        }
    }

    /// Controller configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &DegradationConfig {
        &self.config
    }

    /// Subscribe to controller events
    #[inline]
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<DegradationEvent> {
        self.events.subscribe()
    }

    /// Register or replace a service; its runtime state starts AVAILABLE
    ///
    /// # Errors
    /// [`DegradationError::InvalidService`] if the configuration is invalid.
    pub fn register_service(&self, config: ServiceConfig) -> Result<(), DegradationError> {
        config.validate()?;
        tracing::debug!(service = %config.name, essential = config.essential, "service registered");
        self.state
            .lock()
            .services
            .insert(config.name.clone(), ServiceState::new(config));
        Ok(())
    }

    /// Register or replace a feature
    pub fn register_feature(&self, name: impl Into<String>, toggle: FeatureToggle) {
        let name = name.into();
        let mut state = self.state.lock();
        let mut feature = FeatureState::new(toggle);
        feature.disabled_by_action = state
            .active_actions
            .contains_key(&(ActionKind::DisableFeature, name.clone()));
        state.features.insert(name, feature);
    }

    /// Register the typed fallback for a service or feature
    ///
    /// Lookups for a different `T` find no fallback.
    pub fn register_fallback<T>(&self, name: impl Into<String>, fallback: impl Fallback<T> + 'static)
    where
        T: Send + 'static,
    {
        let typed: Arc<dyn Fallback<T>> = Arc::new(fallback);
        self.fallbacks.insert(name.into(), Arc::new(typed));
    }

    fn fallback<T: Send + 'static>(&self, name: &str) -> Option<Arc<dyn Fallback<T>>> {
        let entry = self.fallbacks.get(name)?;
        let typed = entry.value().downcast_ref::<Arc<dyn Fallback<T>>>().cloned();
        if typed.is_none() {
            tracing::warn!(name = %name, "registered fallback has a different result type");
        }
        typed
    }

    /// Append a rule
    pub fn add_rule(&self, rule: DegradationRule) {
        let events = {
            let mut state = self.state.lock();
            state.rules.push(rule);
            self.evaluate(&mut state)
        };
        self.publish(events);
    }

    /// Report one outcome for a service and re-evaluate the rules
    ///
    /// # Errors
    /// [`DegradationError::UnknownService`] if `name` is not registered.
    pub fn record_service_result(
        &self,
        name: &str,
        success: bool,
        latency: Option<Duration>,
    ) -> Result<ServiceStatus, DegradationError> {
        let multiplier = self.config.essential_unavailable_multiplier;
        let (status, events) = {
            let mut state = self.state.lock();
            let service = state
                .services
                .get_mut(name)
                .ok_or_else(|| DegradationError::UnknownService(name.to_string()))?;

            let mut events = Vec::new();
            if let Some((from, to)) = service.record(success, latency, multiplier) {
                if to == ServiceStatus::Available {
                    tracing::info!(service = %name, %from, "service recovered");
                } else {
                    tracing::warn!(
                        service = %name,
                        %from,
                        %to,
                        failures = service.consecutive_failures,
                        "service status changed"
                    );
                }
                events.push(DegradationEvent::ServiceStatusChanged {
                    service: name.to_string(),
                    from,
                    to,
                });
            }
            let status = service.status;
            events.extend(self.evaluate(&mut state));
            (status, events)
        };
        self.publish(events);
        Ok(status)
    }

    /// Replace the host readings and re-evaluate the rules
    pub fn update_readings(&self, readings: SystemReadings) {
        let events = {
            let mut state = self.state.lock();
            state.readings = readings;
            self.evaluate(&mut state)
        };
        self.publish(events);
    }

    /// Host switch for a feature
    ///
    /// A feature disabled here stays disabled regardless of level changes.
    ///
    /// # Errors
    /// [`DegradationError::UnknownFeature`] if `name` is not registered.
    pub fn set_feature_enabled(&self, name: &str, enabled: bool) -> Result<(), DegradationError> {
        let mut state = self.state.lock();
        let feature = state
            .features
            .get_mut(name)
            .ok_or_else(|| DegradationError::UnknownFeature(name.to_string()))?;
        feature.toggle.enabled = enabled;
        tracing::info!(feature = %name, enabled, "feature toggled");
        Ok(())
    }

    /// Whether a feature is usable at the current level
    ///
    /// Unregistered features are not governed by the controller and report
    /// `true`.
    #[must_use]
    pub fn is_feature_enabled(&self, name: &str) -> bool {
        let state = self.state.lock();
        state
            .features
            .get(name)
            .map_or(true, |feature| feature.usable_at(state.level))
    }

    /// Run `primary` for a service, falling back when it is unavailable or fails
    ///
    /// - UNAVAILABLE service: the primary is skipped
    /// - otherwise the primary's outcome is recorded, and on failure the
    ///   fallback runs
    ///
    /// `fallback` overrides the one registered under `service`.
    ///
    /// # Errors
    /// - [`ExecuteError::ServiceUnavailable`] if the primary was skipped and no
    ///   fallback succeeded
    /// - [`ExecuteError::Primary`] with the primary's error if no fallback
    ///   succeeded
    pub async fn execute_with_fallback<T, E, F, Fut>(
        &self,
        service: &str,
        primary: F,
        fallback: Option<Arc<dyn Fallback<T>>>,
    ) -> Result<T, ExecuteError<E>>
    where
        T: Send + 'static,
        E: std::fmt::Display,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let fallback = fallback.or_else(|| self.fallback::<T>(service));

        if self.service_status(service) == Some(ServiceStatus::Unavailable) {
            tracing::debug!(service = %service, "service unavailable, skipping primary");
            return match fallback {
                Some(fallback) => fallback.call().await.map_err(|error| {
                    tracing::warn!(service = %service, error = %error, "fallback failed");
                    ExecuteError::ServiceUnavailable {
                        service: service.to_string(),
                    }
                }),
                None => Err(ExecuteError::ServiceUnavailable {
                    service: service.to_string(),
                }),
            };
        }

        let started = Instant::now();
        let outcome = primary().await;
        let latency = started.elapsed();
        self.record_if_registered(service, outcome.is_ok(), latency);

        match outcome {
            Ok(value) => Ok(value),
            Err(primary_error) => match fallback {
                Some(fallback) => match fallback.call().await {
                    Ok(value) => {
                        tracing::info!(service = %service, cause = %primary_error, "fallback served result");
                        Ok(value)
                    }
                    Err(error) => {
                        tracing::warn!(
                            service = %service,
                            error = %error,
                            cause = %primary_error,
                            "fallback failed, surfacing primary error"
                        );
                        Err(ExecuteError::Primary(primary_error))
                    }
                },
                None => Err(ExecuteError::Primary(primary_error)),
            },
        }
    }

    fn record_if_registered(&self, service: &str, success: bool, latency: Duration) {
        if let Err(error) = self.record_service_result(service, success, Some(latency)) {
            tracing::debug!(error = %error, "outcome not recorded");
        }
    }

    /// Full snapshot
    #[must_use]
    pub fn get_system_status(&self) -> SystemStatus {
        let state = self.state.lock();
        SystemStatus {
            degradation_level: state.level,
            services: state.services.values().map(ServiceState::summary).collect(),
            features: state
                .features
                .iter()
                .map(|(name, feature)| feature.status(name, state.level))
                .collect(),
            active_actions: state.active_actions.values().cloned().collect(),
            active_fallbacks: state.active_fallbacks.iter().cloned().collect(),
            readings: state.readings,
        }
    }

    /// Current level
    #[must_use]
    pub fn current_level(&self) -> DegradationLevel {
        self.state.lock().level
    }

    /// Actions asserted by the current level
    #[must_use]
    pub fn active_actions(&self) -> Vec<DegradationAction> {
        self.state.lock().active_actions.values().cloned().collect()
    }

    /// Whether a `UseFallback` action is active for `name`
    #[must_use]
    pub fn is_fallback_active(&self, name: &str) -> bool {
        self.state.lock().active_fallbacks.contains(name)
    }

    /// Status of a registered service
    #[must_use]
    pub fn service_status(&self, name: &str) -> Option<ServiceStatus> {
        self.state.lock().services.get(name).map(|s| s.status)
    }

    /// Administrative recovery
    ///
    /// Every service becomes AVAILABLE with zeroed counters, every feature is
    /// re-enabled, active actions are cleared and the level returns to NONE.
    /// Rules are not re-evaluated until the next reported result.
    pub fn reset_all_services(&self) {
        {
            let mut state = self.state.lock();
            for service in state.services.values_mut() {
                service.reset();
            }
            for feature in state.features.values_mut() {
                feature.toggle.enabled = true;
                feature.disabled_by_action = false;
            }
            state.active_actions.clear();
            state.active_fallbacks.clear();
            state.level = DegradationLevel::None;
        }
        metrics::gauge!("bulwark_degradation_level").set(0.0);
        tracing::info!("all services reset, degradation level NONE");
        self.events.publish(DegradationEvent::SystemReset);
    }

    fn context(&self, state: &State) -> DegradationContext {
        let readings = state.readings;
        let memory_mb = readings.memory_mb.or_else(|| {
            self.config
                .sample_process_memory
                .then(|| self.sampler.sample().memory_mb)
                .flatten()
        });

        DegradationContext {
            services: state
                .services
                .iter()
                .map(|(name, service)| {
                    (
                        name.clone(),
                        ServiceContext {
                            status: service.status,
                            essential: service.config.essential,
                        },
                    )
                })
                .collect(),
            system_load: readings.system_load.unwrap_or_default(),
            error_rate: readings.error_rate.unwrap_or_default(),
            response_time_ms: readings.response_time_ms.unwrap_or_default(),
            memory_mb: memory_mb.unwrap_or_default(),
            active_users: readings.active_users.unwrap_or_default(),
        }
    }

    /// Re-evaluate rules under the state lock; returns events to publish
    fn evaluate(&self, state: &mut State) -> Vec<DegradationEvent> {
        let context = self.context(state);
        let mut triggered: Vec<&DegradationRule> =
            state.rules.iter().filter(|rule| rule.matches(&context)).collect();
        let new_level = triggered
            .iter()
            .map(|rule| rule.level)
            .max()
            .unwrap_or(DegradationLevel::None);

        if new_level == state.level {
            return Vec::new();
        }

        // most severe rule's parameters win on duplicate keys
        triggered.sort_by(|a, b| b.level.cmp(&a.level));
        let mut actions: IndexMap<(ActionKind, String), DegradationAction> = IndexMap::new();
        for action in triggered.iter().flat_map(|rule| rule.actions.iter()) {
            actions.entry(action.key()).or_insert_with(|| action.clone());
        }
        let triggered_rules: Vec<String> = triggered.iter().map(|rule| rule.name.clone()).collect();

        let from = std::mem::replace(&mut state.level, new_level);
        if new_level > from {
            tracing::warn!(%from, to = %new_level, rules = ?triggered_rules, "degradation level raised");
        } else {
            tracing::info!(%from, to = %new_level, rules = ?triggered_rules, "degradation level lowered");
        }
        metrics::gauge!("bulwark_degradation_level").set(f64::from(new_level.as_u8()));

        let mut events = vec![DegradationEvent::LevelChanged {
            from,
            to: new_level,
            triggered_rules,
        }];

        state.active_actions.clear();
        state.active_fallbacks.clear();
        for feature in state.features.values_mut() {
            feature.disabled_by_action = false;
        }
        for (key, action) in actions {
            Self::apply_action(state, &action);
            events.push(DegradationEvent::ActionExecuted(action.clone()));
            state.active_actions.insert(key, action);
        }
        events
    }

    fn apply_action(state: &mut State, action: &DegradationAction) {
        match action {
            DegradationAction::DisableFeature { feature } => match state.features.get_mut(feature) {
                Some(toggle) => {
                    toggle.disabled_by_action = true;
                    tracing::info!(feature = %feature, "feature disabled by degradation");
                }
                None => tracing::debug!(feature = %feature, "disable_feature targets an unregistered feature"),
            },
            DegradationAction::UseFallback { service } => {
                state.active_fallbacks.insert(service.clone());
                tracing::info!(service = %service, "fallback activated");
            }
            DegradationAction::ReduceQuality { target, factor } => {
                tracing::info!(target_name = %target, factor, "quality reduction requested");
            }
            DegradationAction::LimitRequests {
                target,
                max_per_minute,
            } => {
                tracing::info!(target_name = %target, max_per_minute, "request limit requested");
            }
            DegradationAction::CacheExtend {
                target,
                ttl_multiplier,
            } => {
                tracing::info!(target_name = %target, ttl_multiplier, "cache extension requested");
            }
        }
    }

    fn publish(&self, events: Vec<DegradationEvent>) {
        for event in events {
            self.events.publish(event);
        }
    }
}

impl Default for DegradationController {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DegradationController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("DegradationController")
            .field("level", &state.level)
            .field("services", &state.services.keys().collect::<Vec<_>>())
            .field("features", &state.features.keys().collect::<Vec<_>>())
            .field("rules", &state.rules.len())
            .finish_non_exhaustive()
    }
}
