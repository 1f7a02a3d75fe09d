//! The shared compute pool backing `AsyncBlock` (§4.9): the one place
//! genuine parallelism enters an otherwise per-stage-serialized handler.
//!
//! Grounded on `tokio::task::spawn_blocking`'s own worker pool, which is
//! exactly this shape (bounded pool, CPU- or IO-bound work handed in,
//! result handed back) — rather than reinvent a pool, this wraps that one
//! with the pre/work/post split §4.9 calls for and a configurable size,
//! sized the same way as [`crate::config::StageRuntimeConfig`] (`num_cpus`
//! by default).

// Layer 1: Standard library imports
use std::future::Future;
use std::sync::Arc;

// Layer 2: Third-party crate imports
use tokio::sync::Semaphore;

/// Bounds how many `AsyncBlock` work closures may run at once, independent
/// of tokio's own blocking-pool size, so a flood of off-loaded work from
/// many stages can't starve other blocking work in the process.
#[derive(Clone)]
pub struct ComputePool {
    permits: Arc<Semaphore>,
}

impl ComputePool {
    pub fn new(size: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(size.max(1))),
        }
    }

    /// Run `pre` on the caller (the stage executor), then `work` on a
    /// blocking-pool thread once a permit is free, then return `work`'s
    /// result to the caller so it can run `post` (§4.9 "only `post` sees
    /// `work`'s result").
    ///
    /// `pre`'s return value is threaded into `work` so both closures can
    /// share state captured before the off-load without that state
    /// needing to cross the thread boundary twice.
    pub async fn run<Pre, Work, T, R>(&self, pre: Pre, work: Work) -> Result<R, ComputePoolError>
    where
        Pre: FnOnce() -> T,
        Work: FnOnce(T) -> R + Send + 'static,
        T: Send + 'static,
        R: Send + 'static,
    {
        let input = pre();
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| ComputePoolError::Closed)?;
        tokio::task::spawn_blocking(move || work(input))
            .await
            .map_err(|_| ComputePoolError::WorkerPanicked)
    }

    /// Variant for an async `work` closure that still wants the
    /// off-stage-executor scheduling semantics without a dedicated OS
    /// thread (e.g. an IO-bound off-load rather than CPU-bound).
    pub async fn run_async<Pre, Fut, T, R>(&self, pre: Pre, work: impl FnOnce(T) -> Fut) -> Result<R, ComputePoolError>
    where
        Pre: FnOnce() -> T,
        Fut: Future<Output = R>,
    {
        let input = pre();
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| ComputePoolError::Closed)?;
        Ok(work(input).await)
    }

    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }
}

/// Errors from running work through a [`ComputePool`].
#[derive(Debug, thiserror::Error)]
pub enum ComputePoolError {
    #[error("compute pool is closed")]
    Closed,

    #[error("compute pool worker panicked")]
    WorkerPanicked,
}
