//! Process-level resource sampling
//!
//! Reads resident memory and CPU time for the current process from
//! `/proc/self/stat` on Linux. Other platforms report `None` for both.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

const PAGE_SIZE_BYTES: u64 = 4096;
const CLOCK_TICKS_PER_SEC: f64 = 100.0;

/// One process reading
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProcessSnapshot {
    /// Resident set size in MB
    pub memory_mb: Option<f64>,
    /// CPU usage since the previous sample, percent of one core
    pub cpu_percent: Option<f64>,
    /// Time since the sampler was created
    #[serde(with = "crate::serde_ms", rename = "uptime_ms")]
    pub uptime: Duration,
}

/// Samples the current process
///
/// CPU usage is computed as a delta against the previous call, so the first
/// sample reports `0.0`.
#[derive(Debug)]
pub struct ProcessSampler {
    started: Instant,
    last_cpu: Mutex<Option<(Instant, u64)>>,
}

impl ProcessSampler {
    /// Create sampler; uptime counts from now
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            last_cpu: Mutex::new(None),
        }
    }

    /// Take a reading
    pub fn sample(&self) -> ProcessSnapshot {
        let stat = read_self_stat();
        let memory_mb = stat.as_deref().and_then(parse_rss_mb);
        let cpu_percent = stat
            .as_deref()
            .and_then(parse_cpu_ticks)
            .map(|ticks| self.cpu_percent(ticks));

        ProcessSnapshot {
            memory_mb,
            cpu_percent,
            uptime: self.started.elapsed(),
        }
    }

    /// Time since the sampler was created
    #[inline]
    #[must_use]
    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    fn cpu_percent(&self, ticks: u64) -> f64 {
        let now = Instant::now();
        let mut last = self.last_cpu.lock();
        let percent = match *last {
            Some((at, prev_ticks)) => {
                let wall = now.duration_since(at).as_secs_f64();
                if wall > 0.0 {
                    #[allow(clippy::cast_precision_loss)]
                    let cpu_secs = ticks.saturating_sub(prev_ticks) as f64 / CLOCK_TICKS_PER_SEC;
                    cpu_secs / wall * 100.0
                } else {
                    0.0
                }
            }
            None => 0.0,
        };
        *last = Some((now, ticks));
        percent
    }
}

impl Default for ProcessSampler {
    fn default() -> Self {
        Self::new()
    }
}

/// Resident memory of the current process in MB, if it can be read
#[must_use]
pub fn resident_memory_mb() -> Option<f64> {
    read_self_stat().as_deref().and_then(parse_rss_mb)
}

#[cfg(target_os = "linux")]
fn read_self_stat() -> Option<String> {
    std::fs::read_to_string("/proc/self/stat").ok()
}

#[cfg(not(target_os = "linux"))]
fn read_self_stat() -> Option<String> {
    None
}

/// Fields after the parenthesised command name; index 0 is field 3 (state).
fn stat_fields(stat: &str) -> Option<Vec<&str>> {
    let close = stat.rfind(')')?;
    Some(stat[close + 1..].split_whitespace().collect())
}

fn parse_cpu_ticks(stat: &str) -> Option<u64> {
    let fields = stat_fields(stat)?;
    // utime and stime are fields 14 and 15
    let utime = fields.get(11)?.parse::<u64>().ok()?;
    let stime = fields.get(12)?.parse::<u64>().ok()?;
    Some(utime + stime)
}

fn parse_rss_mb(stat: &str) -> Option<f64> {
    let fields = stat_fields(stat)?;
    // rss (pages) is field 24
    let pages = fields.get(21)?.parse::<u64>().ok()?;
    #[allow(clippy::cast_precision_loss)]
    let mb = (pages * PAGE_SIZE_BYTES) as f64 / (1024.0 * 1024.0);
    Some(mb)
}
