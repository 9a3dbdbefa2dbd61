//! Degradation rules and their evaluation context

use crate::action::DegradationAction;
use crate::config::DegradationConfig;
use crate::level::DegradationLevel;
use crate::service::ServiceStatus;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Feature names used by the reference rules
pub mod features {
    /// AI-backed analysis
    pub const AI_ANALYSIS: &str = "ai_analysis";
    /// Advanced search
    pub const ADVANCED_SEARCH: &str = "advanced_search";
}

/// Host-supplied readings; unset fields read as zero
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemReadings {
    /// Load average or utilisation
    pub system_load: Option<f64>,
    /// Error rate as a fraction
    pub error_rate: Option<f64>,
    /// Response time in milliseconds
    pub response_time_ms: Option<f64>,
    /// Memory in MiB; sampled from the process when unset
    pub memory_mb: Option<f64>,
    /// Active users
    pub active_users: Option<u64>,
}

/// Service as seen by rules
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceContext {
    /// Current status
    pub status: ServiceStatus,
    /// Essential flag
    pub essential: bool,
}

/// Input to rule predicates, rebuilt for every evaluation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DegradationContext {
    /// Registered services
    pub services: BTreeMap<String, ServiceContext>,
    /// System load
    pub system_load: f64,
    /// Error rate as a fraction
    pub error_rate: f64,
    /// Response time in milliseconds
    pub response_time_ms: f64,
    /// Memory in MiB
    pub memory_mb: f64,
    /// Active users
    pub active_users: u64,
}

impl DegradationContext {
    /// Number of services with `status`
    #[must_use]
    pub fn count_with_status(&self, status: ServiceStatus) -> usize {
        self.services.values().filter(|s| s.status == status).count()
    }

    /// True if any essential service is UNAVAILABLE
    #[must_use]
    pub fn essential_unavailable(&self) -> bool {
        self.services
            .values()
            .any(|s| s.essential && s.status == ServiceStatus::Unavailable)
    }
}

type Predicate = Arc<dyn Fn(&DegradationContext) -> bool + Send + Sync>;

/// Stateless rule: when the predicate holds, the system is at least `level`
#[derive(Clone)]
pub struct DegradationRule {
    /// Rule name
    pub name: String,
    /// Human-readable description
    pub description: String,
    /// Level asserted when triggered
    pub level: DegradationLevel,
    /// Actions asserted when triggered
    pub actions: Vec<DegradationAction>,
    predicate: Predicate,
}

impl DegradationRule {
    /// Create rule with no actions
    pub fn new<F>(name: impl Into<String>, level: DegradationLevel, predicate: F) -> Self
    where
        F: Fn(&DegradationContext) -> bool + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            description: String::new(),
            level,
            actions: Vec::new(),
            predicate: Arc::new(predicate),
        }
    }

    /// With description
    #[inline]
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// With action
    #[inline]
    #[must_use]
    pub fn with_action(mut self, action: DegradationAction) -> Self {
        self.actions.push(action);
        self
    }

    /// Evaluate against `context`
    #[inline]
    #[must_use]
    pub fn matches(&self, context: &DegradationContext) -> bool {
        (self.predicate)(context)
    }
}

impl fmt::Debug for DegradationRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DegradationRule")
            .field("name", &self.name)
            .field("level", &self.level)
            .field("actions", &self.actions)
            .finish_non_exhaustive()
    }
}

/// Reference rule set
///
/// - essential service UNAVAILABLE → CRITICAL
/// - error rate above threshold → SEVERE
/// - memory above threshold → MODERATE
/// - enough services DEGRADED at once → MODERATE
#[must_use]
pub fn default_rules(config: &DegradationConfig) -> Vec<DegradationRule> {
    let error_rate_threshold = config.error_rate_threshold;
    let memory_threshold_mb = config.memory_threshold_mb;
    let degraded_threshold = config.degraded_services_threshold;

    vec![
        DegradationRule::new(
            "essential_service_unavailable",
            DegradationLevel::Critical,
            DegradationContext::essential_unavailable,
        )
        .with_description("an essential service is unavailable")
        .with_action(DegradationAction::disable_feature(features::AI_ANALYSIS))
        .with_action(DegradationAction::disable_feature(features::ADVANCED_SEARCH))
        .with_action(DegradationAction::use_fallback("core_services")),
        DegradationRule::new("high_error_rate", DegradationLevel::Severe, move |ctx| {
            ctx.error_rate > error_rate_threshold
        })
        .with_description(format!("error rate above {:.0}%", error_rate_threshold * 100.0))
        .with_action(DegradationAction::disable_feature(features::AI_ANALYSIS))
        .with_action(DegradationAction::LimitRequests {
            target: "api".to_string(),
            max_per_minute: 60,
        })
        .with_action(DegradationAction::CacheExtend {
            target: "responses".to_string(),
            ttl_multiplier: 3.0,
        }),
        DegradationRule::new("high_memory_usage", DegradationLevel::Moderate, move |ctx| {
            ctx.memory_mb > memory_threshold_mb
        })
        .with_description(format!("memory above {memory_threshold_mb:.0}MB"))
        .with_action(DegradationAction::ReduceQuality {
            target: "analysis".to_string(),
            factor: 0.5,
        })
        .with_action(DegradationAction::LimitRequests {
            target: "api".to_string(),
            max_per_minute: 120,
        }),
        DegradationRule::new("multiple_services_degraded", DegradationLevel::Moderate, move |ctx| {
            ctx.count_with_status(ServiceStatus::Degraded) >= degraded_threshold
        })
        .with_description(format!("{degraded_threshold} or more services degraded"))
        .with_action(DegradationAction::disable_feature(features::AI_ANALYSIS))
        .with_action(DegradationAction::CacheExtend {
            target: "responses".to_string(),
            ttl_multiplier: 2.0,
        }),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(services: &[(&str, ServiceStatus, bool)]) -> DegradationContext {
        DegradationContext {
            services: services
                .iter()
                .map(|(name, status, essential)| {
                    (
                        (*name).to_string(),
                        ServiceContext {
                            status: *status,
                            essential: *essential,
                        },
                    )
                })
                .collect(),
            ..DegradationContext::default()
        }
    }

    fn triggered(ctx: &DegradationContext) -> Vec<String> {
        default_rules(&DegradationConfig::default())
            .into_iter()
            .filter(|rule| rule.matches(ctx))
            .map(|rule| rule.name)
            .collect()
    }

    #[test]
    fn quiet_system_triggers_nothing() {
        assert!(triggered(&context(&[("db", ServiceStatus::Available, true)])).is_empty());
    }

    #[test]
    fn essential_unavailable_is_critical() {
        let ctx = context(&[("db", ServiceStatus::Unavailable, true)]);
        assert_eq!(triggered(&ctx), vec!["essential_service_unavailable"]);

        let ctx = context(&[("search", ServiceStatus::Unavailable, false)]);
        assert!(triggered(&ctx).is_empty());
    }

    #[test]
    fn readings_thresholds() {
        let mut ctx = context(&[]);
        ctx.error_rate = 0.2;
        ctx.memory_mb = 1024.0;
        assert_eq!(triggered(&ctx), vec!["high_error_rate", "high_memory_usage"]);
    }

    #[test]
    fn two_degraded_services() {
        let ctx = context(&[
            ("a", ServiceStatus::Degraded, true),
            ("b", ServiceStatus::Degraded, false),
        ]);
        assert_eq!(triggered(&ctx), vec!["multiple_services_degraded"]);
    }
}
