//! Bulwark Degrade - graceful degradation controller
//!
//! The [`DegradationController`] tracks per-service outcomes, evaluates a
//! rule set into a system-wide [`DegradationLevel`], and reacts with typed
//! [`DegradationAction`]s:
//! - `DisableFeature` switches a [`FeatureToggle`] off until the level drops
//! - `UseFallback` marks a service's fallback as the active path
//! - `ReduceQuality`, `LimitRequests`, `CacheExtend` are hints for the host
//!
//! Feature queries are synchronous reads against current state.

#![warn(unreachable_pub)]

pub mod action;
pub mod config;
pub mod controller;
pub mod error;
pub mod feature;
pub mod level;
pub mod rules;
pub mod service;

pub use action::{ActionKind, DegradationAction};
pub use config::DegradationConfig;
pub use controller::{DegradationController, DegradationEvent, SystemStatus};
pub use error::{DegradationError, ExecuteError};
pub use feature::{FeatureStatus, FeatureToggle};
pub use level::DegradationLevel;
pub use rules::{default_rules, DegradationContext, DegradationRule, ServiceContext, SystemReadings};
pub use service::{ServiceConfig, ServiceStatus, ServiceSummary};
