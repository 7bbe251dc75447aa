//! Persistent worker pool for short-lived jobs.
//!
//! A [`JobPool`] owns its worker threads for its whole lifetime. Each call to
//! [`JobPool::scope`] runs the caller's closure on the current thread while
//! the jobs it spawns run on the workers, and returns once every spawned job
//! has finished. Jobs may borrow anything that outlives the scope.
//!
//! Jobs must not block on each other: a job that waits for another job can
//! starve the pool. Dependent work is expressed as continuations, i.e. the
//! coordinator spawns the next job when the previous one reports completion.
//!
//! # Example
//!
//! ```
//! use frameflow_core::jobs::JobPool;
//! use std::sync::mpsc;
//!
//! let pool = JobPool::new(4).unwrap();
//! let inputs = vec![1u32, 2, 3, 4];
//!
//! let total: u32 = pool.scope(|s| {
//!     let (tx, rx) = mpsc::channel();
//!     for value in &inputs {
//!         let tx = tx.clone();
//!         s.spawn(move || {
//!             let _ = tx.send(value * 10);
//!         });
//!     }
//!     drop(tx);
//!     rx.iter().sum()
//! });
//! assert_eq!(total, 100);
//! ```

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

/// The worker threads could not be started.
#[derive(Debug, thiserror::Error)]
#[error("failed to start job workers: {0}")]
pub struct JobPoolError(#[from] rayon::ThreadPoolBuildError);

/// A fixed set of worker threads executing scoped jobs.
#[derive(Debug, Clone)]
pub struct JobPool {
    workers: Arc<rayon::ThreadPool>,
    num_threads: usize,
}

impl JobPool {
    /// Starts `num_threads` workers (at least one).
    pub fn new(num_threads: usize) -> Result<Self, JobPoolError> {
        let num_threads = num_threads.max(1);
        let workers = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .thread_name(|index| format!("frameflow-job-{index}"))
            .start_handler(|_| name_worker_thread())
            .build()?;
        log::debug!("Started {num_threads} job workers");
        Ok(Self {
            workers: Arc::new(workers),
            num_threads,
        })
    }

    /// Starts one worker per available CPU core.
    pub fn default_threads() -> Result<Self, JobPoolError> {
        Self::new(std::thread::available_parallelism().map_or(1, |n| n.get()))
    }

    pub fn num_threads(&self) -> usize {
        self.num_threads
    }

    /// Runs `f` with a scope that can spawn jobs onto the workers.
    ///
    /// `f` itself runs on the calling thread, so it may block on results of
    /// the jobs it spawned. Returns after `f` has returned and every spawned
    /// job has run.
    pub fn scope<'env, F, R>(&self, f: F) -> R
    where
        F: for<'q> FnOnce(&JobScope<'q, 'env>) -> R,
    {
        self.workers.in_place_scope(|scope| f(&JobScope { scope }))
    }
}

fn name_worker_thread() {
    crate::set_thread_name!("job-worker");
}

/// Handle for spawning jobs onto a running [`JobPool`].
pub struct JobScope<'q, 'env> {
    scope: &'q rayon::Scope<'env>,
}

impl<'env> JobScope<'_, 'env> {
    /// Queues a job. A panicking job is logged and does not affect the others.
    pub fn spawn<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'env,
    {
        self.scope.spawn(move |_| {
            if catch_unwind(AssertUnwindSafe(f)).is_err() {
                log::error!(
                    "Job panicked on worker {:?}",
                    std::thread::current().name().unwrap_or("unnamed")
                );
            }
        });
    }
}
