//! Aggregated configuration
//!
//! One file configures every component:
//!
//! ```toml
//! [retry]
//! max_attempts = 5
//! base_delay_ms = 200
//!
//! [circuit_breaker]
//! failure_threshold = 3
//!
//! [health]
//! check_interval_ms = 15000
//! alert_channels = ["log"]
//!
//! [[degradation.services]]
//! name = "database"
//! essential = true
//! degradation_threshold = 3
//! ```
//!
//! The format follows the file extension (`.toml`, `.yaml`, `.yml`).

use bulwark_core::TelemetryConfig;
use bulwark_degrade::{DegradationConfig, DegradationError};
use bulwark_guard::{CircuitBreakerConfig, GuardConfig, GuardConfigError, RetryConfig};
use bulwark_health::{HealthConfig, HealthError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Configuration loading and validation errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("failed to read config file {}: {source}", .path.display())]
    Io {
        /// File path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Extension not recognised
    #[error("unsupported config format '{0}' (expected toml, yaml or yml)")]
    UnsupportedFormat(String),

    /// TOML parse error
    #[error("invalid TOML: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialisation error
    #[error("failed to render TOML: {0}")]
    TomlRender(#[from] toml::ser::Error),

    /// YAML parse or serialisation error
    #[error("invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Guard settings rejected
    #[error(transparent)]
    Guard(#[from] GuardConfigError),

    /// Health settings rejected
    #[error(transparent)]
    Health(#[from] HealthError),

    /// Degradation settings rejected
    #[error(transparent)]
    Degradation(#[from] DegradationError),
}

/// Serialisation format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    /// TOML
    Toml,
    /// YAML
    Yaml,
}

impl ConfigFormat {
    /// Format implied by a file extension
    ///
    /// # Errors
    /// [`ConfigError::UnsupportedFormat`] for anything else.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();
        extension.parse()
    }
}

impl FromStr for ConfigFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "toml" => Ok(Self::Toml),
            "yaml" | "yml" => Ok(Self::Yaml),
            other => Err(ConfigError::UnsupportedFormat(other.to_string())),
        }
    }
}

impl fmt::Display for ConfigFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Toml => "toml",
            Self::Yaml => "yaml",
        })
    }
}

/// Settings for every component
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceConfig {
    /// Default retry policy
    pub retry: RetryConfig,
    /// Default circuit breaker
    pub circuit_breaker: CircuitBreakerConfig,
    /// Health monitor
    pub health: HealthConfig,
    /// Degradation controller
    pub degradation: DegradationConfig,
    /// Logging
    pub telemetry: TelemetryConfig,
}

impl ResilienceConfig {
    /// Load and validate a config file
    ///
    /// # Errors
    /// I/O, format, parse or validation failure.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let format = ConfigFormat::from_path(path)?;
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_str_as(&content, format)?;
        tracing::debug!(path = %path.display(), %format, "configuration loaded");
        Ok(config)
    }

    /// Parse and validate a config string
    ///
    /// # Errors
    /// Parse or validation failure.
    pub fn from_str_as(content: &str, format: ConfigFormat) -> Result<Self, ConfigError> {
        let config: Self = match format {
            ConfigFormat::Toml => toml::from_str(content)?,
            ConfigFormat::Yaml => serde_yaml::from_str(content)?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Render in `format`
    ///
    /// # Errors
    /// Serialisation failure.
    pub fn render(&self, format: ConfigFormat) -> Result<String, ConfigError> {
        Ok(match format {
            ConfigFormat::Toml => toml::to_string_pretty(self)?,
            ConfigFormat::Yaml => serde_yaml::to_string(self)?,
        })
    }

    /// Check every component's invariants
    ///
    /// # Errors
    /// The first violation found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.guard_config().validate()?;
        self.health.validate()?;
        self.degradation.validate()?;
        Ok(())
    }

    /// Guard defaults derived from this config
    #[must_use]
    pub fn guard_config(&self) -> GuardConfig {
        GuardConfig {
            retry: self.retry,
            circuit_breaker: self.circuit_breaker,
        }
    }
}
