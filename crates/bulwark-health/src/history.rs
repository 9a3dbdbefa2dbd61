//! Bounded metrics history

use crate::types::SystemMetricsSample;
use std::collections::VecDeque;

/// Default number of samples kept
pub const DEFAULT_HISTORY_CAPACITY: usize = 100;

/// Ring buffer of metrics samples; the oldest is evicted first
#[derive(Debug, Clone)]
pub struct MetricsHistory {
    capacity: usize,
    samples: VecDeque<SystemMetricsSample>,
}

impl MetricsHistory {
    /// Create buffer holding at most `capacity` samples (minimum 1)
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            samples: VecDeque::with_capacity(capacity),
        }
    }

    /// Append a sample, evicting the oldest when full
    pub fn push(&mut self, sample: SystemMetricsSample) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    /// Up to `limit` most recent samples, oldest first; all when `None`
    #[must_use]
    pub fn recent(&self, limit: Option<usize>) -> Vec<SystemMetricsSample> {
        let take = limit.unwrap_or(self.samples.len()).min(self.samples.len());
        self.samples
            .iter()
            .skip(self.samples.len() - take)
            .cloned()
            .collect()
    }

    /// Most recent sample
    #[must_use]
    pub fn latest(&self) -> Option<&SystemMetricsSample> {
        self.samples.back()
    }

    /// Samples held
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// True when no sample has been recorded
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

impl Default for MetricsHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}
