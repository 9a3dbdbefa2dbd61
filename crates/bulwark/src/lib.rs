//! Bulwark - resilience core for fallible async operations
//!
//! Three collaborators, usually used together:
//! - [`ExecutionGuard`](guard::ExecutionGuard): circuit breaker, retry with
//!   backoff and error classification around one operation
//! - [`HealthMonitor`](health::HealthMonitor): periodic probes, metrics
//!   history, alerting
//! - [`DegradationController`](degrade::DegradationController): service
//!   status aggregation into a system level, feature gating, fallbacks
//!
//! [`Resilience`] owns one of each and feeds guard outcomes and probe
//! results into the controller. [`ResilienceConfig`] loads all settings from
//! TOML or YAML.
//!
//! # Example
//!
//! ```rust,ignore
//! use bulwark::{Resilience, ResilienceConfig};
//! use bulwark::guard::RecoveryOptions;
//!
//! let resilience = Resilience::new(&ResilienceConfig::from_file("bulwark.toml")?)?;
//! resilience.start();
//! let rows = resilience
//!     .call("database", RecoveryOptions::new(), || async { query().await })
//!     .await?;
//! ```

#![warn(unreachable_pub)]

pub mod config;
pub mod resilience;

pub use config::{ConfigError, ConfigFormat, ResilienceConfig};
pub use resilience::{Resilience, ResilienceStatus};

pub use bulwark_core::{fallback_fn, init_tracing, EventBus, Fallback, TelemetryConfig};
pub use bulwark_degrade as degrade;
pub use bulwark_guard as guard;
pub use bulwark_health as health;
