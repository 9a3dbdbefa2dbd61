//! Testing utilities for the bulwark workspace
//!
//! Shared doubles for fallible operations and health probes.

#![allow(missing_docs)]

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};

/// Error whose message drives classification
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct TestError {
    pub message: String,
}

impl TestError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn network() -> Self {
        Self::new("network connection refused")
    }

    pub fn validation() -> Self {
        Self::new("invalid argument")
    }

    pub fn database() -> Self {
        Self::new("database connection lost")
    }
}

/// Operation that fails a fixed number of times before succeeding
#[derive(Debug)]
pub struct FlakyOperation<T> {
    failures_before_success: u32,
    error: TestError,
    value: T,
    calls: AtomicU32,
}

impl<T: Clone> FlakyOperation<T> {
    pub fn new(failures_before_success: u32, value: T) -> Self {
        Self {
            failures_before_success,
            error: TestError::network(),
            value,
            calls: AtomicU32::new(0),
        }
    }

    /// Never succeeds
    pub fn always_failing(value: T) -> Self {
        Self::new(u32::MAX, value)
    }

    #[must_use]
    pub fn with_error(mut self, error: TestError) -> Self {
        self.error = error;
        self
    }

    pub fn call(&self) -> impl Future<Output = Result<T, TestError>> + Send + 'static
    where
        T: Send + 'static,
    {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        let outcome = if n < self.failures_before_success {
            Err(self.error.clone())
        } else {
            Ok(self.value.clone())
        };
        async move { outcome }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

/// Sequence of probe outcomes; the last one repeats once the script runs out
#[derive(Debug)]
pub struct ScriptedProbe {
    script: Mutex<VecDeque<bool>>,
    last: Mutex<bool>,
    calls: AtomicU32,
}

impl ScriptedProbe {
    pub fn new(outcomes: impl IntoIterator<Item = bool>) -> Self {
        Self {
            script: Mutex::new(outcomes.into_iter().collect()),
            last: Mutex::new(true),
            calls: AtomicU32::new(0),
        }
    }

    pub fn always(healthy: bool) -> Self {
        let probe = Self::new([]);
        *probe.last.lock() = healthy;
        probe
    }

    /// Next scripted outcome
    pub fn next_outcome(&self) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.script.lock().pop_front() {
            Some(outcome) => {
                *self.last.lock() = outcome;
                outcome
            }
            None => *self.last.lock(),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}
