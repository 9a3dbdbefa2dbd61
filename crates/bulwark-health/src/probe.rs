//! Health probes

use crate::types::HealthStatus;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;

/// Outcome reported by a probe
///
/// The monitor supplies latency and timestamp; the probe supplies only
/// status, message and metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeResult {
    /// Reported status
    pub status: HealthStatus,
    /// Optional human-readable detail
    pub message: Option<String>,
    /// Optional probe-specific data
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl ProbeResult {
    /// Result with status and no message
    #[inline]
    #[must_use]
    pub fn new(status: HealthStatus) -> Self {
        Self {
            status,
            message: None,
            metadata: BTreeMap::new(),
        }
    }

    /// Healthy result
    #[inline]
    #[must_use]
    pub fn healthy() -> Self {
        Self::new(HealthStatus::Healthy)
    }

    /// Critical result with message
    #[inline]
    #[must_use]
    pub fn critical(message: impl Into<String>) -> Self {
        Self::new(HealthStatus::Critical).with_message(message)
    }

    /// With message
    #[inline]
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// With metadata entry
    #[inline]
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Named service check
///
/// Errors are never propagated by the monitor; they are recorded as a
/// critical result.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// Check the service
    async fn check(&self) -> anyhow::Result<ProbeResult>;
}

/// [`HealthProbe`] backed by an async closure
#[derive(Debug, Clone)]
pub struct FnProbe<F>(F);

#[async_trait]
impl<F, Fut> HealthProbe for FnProbe<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<ProbeResult>> + Send + 'static,
{
    async fn check(&self) -> anyhow::Result<ProbeResult> {
        (self.0)().await
    }
}

/// Wrap an async closure as a [`HealthProbe`]
#[inline]
#[must_use]
pub fn probe_fn<F>(f: F) -> FnProbe<F> {
    FnProbe(f)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn closure_probe() {
        let probe = probe_fn(|| async { Ok::<_, anyhow::Error>(ProbeResult::healthy().with_metadata("pool", "4")) });
        let result = probe.check().await.unwrap();
        assert_eq!(result.status, HealthStatus::Healthy);
        assert_eq!(result.metadata["pool"], "4");
    }

    #[test]
    fn critical_carries_message() {
        let result = ProbeResult::critical("timed out");
        assert_eq!(result.status, HealthStatus::Critical);
        assert_eq!(result.message.as_deref(), Some("timed out"));
    }
}
