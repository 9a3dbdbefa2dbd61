//! Feature toggles gated by degradation level

use crate::level::DegradationLevel;
use serde::{Deserialize, Serialize};

/// Feature switch
///
/// A feature is usable iff it is enabled and the system level does not
/// exceed `degradation_level`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureToggle {
    /// Host-controlled switch
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    /// Highest system level the feature tolerates
    #[serde(default)]
    pub degradation_level: DegradationLevel,
    /// Name of a registered fallback serving this feature when it is off
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<String>,
}

fn enabled_by_default() -> bool {
    true
}

impl FeatureToggle {
    /// Enabled feature tolerating up to `level`
    #[inline]
    #[must_use]
    pub fn new(level: DegradationLevel) -> Self {
        Self {
            enabled: true,
            degradation_level: level,
            fallback: None,
        }
    }

    /// With fallback name
    #[inline]
    #[must_use]
    pub fn with_fallback(mut self, fallback: impl Into<String>) -> Self {
        self.fallback = Some(fallback.into());
        self
    }

    /// Start disabled
    #[inline]
    #[must_use]
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

impl Default for FeatureToggle {
    fn default() -> Self {
        Self::new(DegradationLevel::None)
    }
}

/// Registered feature: host toggle plus action override
#[derive(Debug, Clone)]
pub(crate) struct FeatureState {
    pub(crate) toggle: FeatureToggle,
    pub(crate) disabled_by_action: bool,
}

impl FeatureState {
    pub(crate) fn new(toggle: FeatureToggle) -> Self {
        Self {
            toggle,
            disabled_by_action: false,
        }
    }

    /// Enabled by host and not switched off by an active action
    pub(crate) fn enabled(&self) -> bool {
        self.toggle.enabled && !self.disabled_by_action
    }

    pub(crate) fn usable_at(&self, level: DegradationLevel) -> bool {
        self.enabled() && level <= self.toggle.degradation_level
    }

    pub(crate) fn status(&self, name: &str, level: DegradationLevel) -> FeatureStatus {
        FeatureStatus {
            name: name.to_string(),
            enabled: self.enabled(),
            degradation_level: self.toggle.degradation_level,
            disabled_by_action: self.disabled_by_action,
            usable: self.usable_at(level),
            fallback: self.toggle.fallback.clone(),
        }
    }
}

/// Reported view of a feature
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureStatus {
    /// Feature name
    pub name: String,
    /// Enabled by host and not switched off by an action
    pub enabled: bool,
    /// Highest tolerated level
    pub degradation_level: DegradationLevel,
    /// Switched off by an active `DisableFeature` action
    pub disabled_by_action: bool,
    /// Usable at the current level
    pub usable: bool,
    /// Fallback name
    pub fallback: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gating_by_level() {
        let feature = FeatureState::new(FeatureToggle::new(DegradationLevel::Moderate));
        assert!(feature.usable_at(DegradationLevel::None));
        assert!(feature.usable_at(DegradationLevel::Moderate));
        assert!(!feature.usable_at(DegradationLevel::Severe));
    }

    #[test]
    fn action_override() {
        let mut feature = FeatureState::new(FeatureToggle::new(DegradationLevel::Critical));
        feature.disabled_by_action = true;
        assert!(!feature.enabled());
        assert!(!feature.usable_at(DegradationLevel::None));
    }

    #[test]
    fn toggle_defaults_from_json() {
        let toggle: FeatureToggle = serde_json::from_str(r#"{"degradation_level": "MINIMAL"}"#).unwrap();
        assert!(toggle.enabled);
        assert_eq!(toggle.degradation_level, DegradationLevel::Minimal);
    }
}
