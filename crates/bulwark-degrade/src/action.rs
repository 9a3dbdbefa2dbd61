//! Degradation actions
//!
//! Each action kind carries its own parameters. Two actions with the same
//! `(kind, target)` are the same assertion; the first one seen wins.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Reaction to a triggered rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DegradationAction {
    /// Switch a feature off while asserted
    DisableFeature {
        /// Feature name
        feature: String,
    },
    /// Route a service's callers to its fallback
    UseFallback {
        /// Service name
        service: String,
    },
    /// Host hint: lower output quality
    ReduceQuality {
        /// What to reduce
        target: String,
        /// Quality multiplier in `(0, 1]`
        factor: f64,
    },
    /// Host hint: throttle requests
    LimitRequests {
        /// What to throttle
        target: String,
        /// Allowed requests per minute
        max_per_minute: u32,
    },
    /// Host hint: keep cached entries longer
    CacheExtend {
        /// Which cache
        target: String,
        /// TTL multiplier
        ttl_multiplier: f64,
    },
}

/// Action discriminant
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// [`DegradationAction::DisableFeature`]
    DisableFeature,
    /// [`DegradationAction::UseFallback`]
    UseFallback,
    /// [`DegradationAction::ReduceQuality`]
    ReduceQuality,
    /// [`DegradationAction::LimitRequests`]
    LimitRequests,
    /// [`DegradationAction::CacheExtend`]
    CacheExtend,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::DisableFeature => "disable_feature",
            Self::UseFallback => "use_fallback",
            Self::ReduceQuality => "reduce_quality",
            Self::LimitRequests => "limit_requests",
            Self::CacheExtend => "cache_extend",
        })
    }
}

impl DegradationAction {
    /// Disable `feature`
    #[must_use]
    pub fn disable_feature(feature: impl Into<String>) -> Self {
        Self::DisableFeature {
            feature: feature.into(),
        }
    }

    /// Activate the fallback for `service`
    #[must_use]
    pub fn use_fallback(service: impl Into<String>) -> Self {
        Self::UseFallback {
            service: service.into(),
        }
    }

    /// Kind of this action
    #[must_use]
    pub fn kind(&self) -> ActionKind {
        match self {
            Self::DisableFeature { .. } => ActionKind::DisableFeature,
            Self::UseFallback { .. } => ActionKind::UseFallback,
            Self::ReduceQuality { .. } => ActionKind::ReduceQuality,
            Self::LimitRequests { .. } => ActionKind::LimitRequests,
            Self::CacheExtend { .. } => ActionKind::CacheExtend,
        }
    }

    /// Feature, service or host target the action applies to
    #[must_use]
    pub fn target(&self) -> &str {
        match self {
            Self::DisableFeature { feature } => feature,
            Self::UseFallback { service } => service,
            Self::ReduceQuality { target, .. }
            | Self::LimitRequests { target, .. }
            | Self::CacheExtend { target, .. } => target,
        }
    }

    /// Deduplication key
    #[must_use]
    pub fn key(&self) -> (ActionKind, String) {
        (self.kind(), self.target().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tagged_serde() {
        let action = DegradationAction::LimitRequests {
            target: "api".into(),
            max_per_minute: 60,
        };
        let json = serde_json::to_value(&action).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"type": "limit_requests", "target": "api", "max_per_minute": 60})
        );
        let back: DegradationAction = serde_json::from_value(json).unwrap();
        assert_eq!(back, action);
    }

    #[test]
    fn key_ignores_parameters() {
        let a = DegradationAction::CacheExtend {
            target: "responses".into(),
            ttl_multiplier: 3.0,
        };
        let b = DegradationAction::CacheExtend {
            target: "responses".into(),
            ttl_multiplier: 2.0,
        };
        assert_eq!(a.key(), b.key());
        assert_ne!(a.key(), DegradationAction::disable_feature("responses").key());
    }
}
