//! Bulwark Core - shared plumbing for the resilience core
//!
//! Every bulwark component builds on the pieces in this crate:
//! - [`EventBus`]: typed broadcast channel each component publishes on
//! - [`Fallback`]: the typed alternate code path used by the guard and the
//!   degradation controller
//! - [`ProcessSampler`]: process memory / CPU readings
//! - [`serde_ms`]: durations as integer milliseconds in config files
//! - [`telemetry`]: tracing subscriber setup

#![warn(unreachable_pub)]

pub mod event;
pub mod fallback;
pub mod process;
pub mod serde_ms;
pub mod telemetry;

pub use event::EventBus;
pub use fallback::{fallback_fn, Fallback, FnFallback};
pub use process::{ProcessSampler, ProcessSnapshot};
pub use telemetry::{init_tracing, TelemetryConfig};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
