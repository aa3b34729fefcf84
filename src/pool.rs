//! The bounded worker pool sub-analyses run on.

use rayon::{ThreadPool, ThreadPoolBuildError, ThreadPoolBuilder};
use std::sync::Arc;

/// Cheaply clonable handle to a bounded thread pool.
///
/// One pool is meant to be created at start-up and shared by every request;
/// orchestrators receive a handle instead of reaching for a global.
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<ThreadPool>,
}

impl WorkerPool {
    /// Builds a pool with `threads` workers, or one per available CPU when `threads` is 0.
    pub fn new(threads: usize) -> Result<Self, ThreadPoolBuildError> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|index| format!("esa-worker-{}", index))
            .build()?;
        Ok(WorkerPool {
            inner: Arc::new(pool),
        })
    }

    pub fn threads(&self) -> usize {
        self.inner.current_num_threads()
    }

    /// Runs `op` inside the pool, blocking the caller until it returns.
    pub fn install<OP, R>(&self, op: OP) -> R
    where
        OP: FnOnce() -> R + Send,
        R: Send,
    {
        self.inner.install(op)
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool").field("threads", &self.threads()).finish()
    }
}
