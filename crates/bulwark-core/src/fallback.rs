//! Typed fallback interface
//!
//! A [`Fallback`] is the alternate code path run when a primary operation (or
//! an unavailable service) would otherwise fail the caller. Its own errors are
//! never surfaced: callers log them and re-raise the primary cause.

use async_trait::async_trait;
use std::future::Future;

/// Alternate code path producing a `T`
#[async_trait]
pub trait Fallback<T>: Send + Sync {
    /// Produce the fallback value
    async fn call(&self) -> anyhow::Result<T>;
}

/// [`Fallback`] backed by an async closure
#[derive(Debug, Clone)]
pub struct FnFallback<F>(F);

#[async_trait]
impl<T, F, Fut> Fallback<T> for FnFallback<F>
where
    T: Send + 'static,
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
{
    async fn call(&self) -> anyhow::Result<T> {
        (self.0)().await
    }
}

/// Wrap an async closure as a [`Fallback`]
#[inline]
#[must_use]
pub fn fallback_fn<F>(f: F) -> FnFallback<F> {
    FnFallback(f)
}
