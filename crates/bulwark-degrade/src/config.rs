//! Degradation controller configuration

use crate::error::DegradationError;
use crate::feature::FeatureToggle;
use crate::service::ServiceConfig;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Controller settings, reference-rule thresholds, and optional
/// pre-registered services and features
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DegradationConfig {
    /// Install the reference rule set
    pub use_default_rules: bool,
    /// Memory (MiB) above which the memory rule triggers
    pub memory_threshold_mb: f64,
    /// Error rate (fraction) above which the error-rate rule triggers
    pub error_rate_threshold: f64,
    /// Simultaneously DEGRADED services that trigger the multi-service rule
    pub degraded_services_threshold: usize,
    /// Failure multiple at which an essential service becomes UNAVAILABLE;
    /// `1` (the default) keeps essential services at DEGRADED
    pub essential_unavailable_multiplier: u32,
    /// Sample process memory when the host supplies no reading
    pub sample_process_memory: bool,
    /// Services registered at construction
    pub services: Vec<ServiceConfig>,
    /// Features registered at construction
    pub features: IndexMap<String, FeatureToggle>,
}

impl DegradationConfig {
    /// Create config with defaults
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Without the reference rules
    #[inline]
    #[must_use]
    pub fn without_default_rules(mut self) -> Self {
        self.use_default_rules = false;
        self
    }

    /// With memory threshold
    #[inline]
    #[must_use]
    pub fn with_memory_threshold_mb(mut self, mb: f64) -> Self {
        self.memory_threshold_mb = mb;
        self
    }

    /// With error-rate threshold
    #[inline]
    #[must_use]
    pub fn with_error_rate_threshold(mut self, rate: f64) -> Self {
        self.error_rate_threshold = rate;
        self
    }

    /// With process memory sampling on or off
    #[inline]
    #[must_use]
    pub fn with_process_memory_sampling(mut self, enabled: bool) -> Self {
        self.sample_process_memory = enabled;
        self
    }

    /// With essential-service escalation after `multiplier × threshold` failures
    #[inline]
    #[must_use]
    pub fn with_essential_unavailable_multiplier(mut self, multiplier: u32) -> Self {
        self.essential_unavailable_multiplier = multiplier;
        self
    }

    /// With a service registered at construction
    #[inline]
    #[must_use]
    pub fn with_service(mut self, service: ServiceConfig) -> Self {
        self.services.push(service);
        self
    }

    /// With a feature registered at construction
    #[inline]
    #[must_use]
    pub fn with_feature(mut self, name: impl Into<String>, toggle: FeatureToggle) -> Self {
        self.features.insert(name.into(), toggle);
        self
    }

    /// Check invariants
    ///
    /// # Errors
    /// The first invalid threshold or service.
    pub fn validate(&self) -> Result<(), DegradationError> {
        if !(0.0..=1.0).contains(&self.error_rate_threshold) {
            return Err(DegradationError::InvalidConfig(
                "error_rate_threshold must be a fraction in [0, 1]",
            ));
        }
        if self.memory_threshold_mb.is_nan() || self.memory_threshold_mb <= 0.0 {
            return Err(DegradationError::InvalidConfig("memory_threshold_mb must be positive"));
        }
        if self.degraded_services_threshold == 0 {
            return Err(DegradationError::InvalidConfig(
                "degraded_services_threshold must be at least 1",
            ));
        }
        if self.essential_unavailable_multiplier == 0 {
            return Err(DegradationError::InvalidConfig(
                "essential_unavailable_multiplier must be at least 1",
            ));
        }
        self.services.iter().try_for_each(ServiceConfig::validate)
    }
}

impl Default for DegradationConfig {
    fn default() -> Self {
        Self {
            use_default_rules: true,
            memory_threshold_mb: 512.0,
            error_rate_threshold: 0.10,
            degraded_services_threshold: 2,
            essential_unavailable_multiplier: 1,
            sample_process_memory: true,
            services: Vec::new(),
            features: IndexMap::new(),
        }
    }
}
