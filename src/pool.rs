//! Worker-pool adaptor for backgrounded per-frame jobs.
//!
//! The codec only needs `submit(job) -> Task` with tasks that are never
//! dropped and can be waited on independently; queueing and fairness
//! belong to the pool. Binding a pool to a container never changes any
//! observable result, only when the work happens.

use std::sync::mpsc;
use std::sync::Arc;

use log::debug;

use crate::error::TrpxError;

/// Degree of parallelism as a fraction of the machine's cores.
///
/// `0.0` means sequential execution, `1.0` all cores; values outside
/// `[0, 1]` are clamped.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Parallelism(f64);

impl Parallelism {
    pub fn new(fraction: f64) -> Self {
        Self(fraction.clamp(0.0, 1.0))
    }

    /// Fraction corresponding to `n` cores on this machine.
    pub fn from_cores(n: usize) -> Self {
        let avail = available_cores();
        Self(n.clamp(1, avail) as f64 / avail as f64)
    }

    pub fn fraction(&self) -> f64 {
        self.0
    }

    /// Worker count this fraction maps to, at least one.
    pub fn cores(&self) -> usize {
        let avail = available_cores();
        ((self.0 * avail as f64) as usize).clamp(1, avail)
    }
}

impl Default for Parallelism {
    fn default() -> Self {
        Self(1.0)
    }
}

fn available_cores() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Handle to a running worker pool. Cheap to clone; all clones share
/// the same threads.
#[derive(Clone)]
pub struct Workers {
    pool: Arc<rayon::ThreadPool>,
    dop: Parallelism,
}

impl Workers {
    pub fn new(dop: Parallelism) -> Result<Self, TrpxError> {
        let threads = dop.cores();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("trpx-worker-{i}"))
            .build()
            .map_err(|e| TrpxError::Pool(e.to_string()))?;
        debug!("worker pool up: {threads} threads (dop {})", dop.fraction());
        Ok(Self {
            pool: Arc::new(pool),
            dop,
        })
    }

    /// Run `job` on the pool, returning a handle its result can be
    /// collected from. Submissions are executed in any order but never
    /// dropped.
    pub fn submit<T, F>(&self, job: F) -> Task<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        self.pool.spawn(move || {
            let _ = tx.send(job());
        });
        Task { rx }
    }

    pub fn dop(&self) -> Parallelism {
        self.dop
    }

    pub(crate) fn pool(&self) -> &rayon::ThreadPool {
        &self.pool
    }
}

impl std::fmt::Debug for Workers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workers")
            .field("threads", &self.pool.current_num_threads())
            .field("dop", &self.dop.fraction())
            .finish()
    }
}

/// A backgrounded job's pending result.
#[derive(Debug)]
pub struct Task<T> {
    rx: mpsc::Receiver<T>,
}

impl<T> Task<T> {
    /// Block until the job finishes. Fails only if the worker died
    /// before delivering, which a well-formed job never does.
    pub fn wait(self) -> Result<T, TrpxError> {
        self.rx
            .recv()
            .map_err(|_| TrpxError::Pool("worker dropped the task result".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fraction_is_clamped() {
        assert_eq!(Parallelism::new(7.0).fraction(), 1.0);
        assert_eq!(Parallelism::new(-1.0).fraction(), 0.0);
        assert!(Parallelism::new(0.0).cores() >= 1);
    }

    #[test]
    fn tasks_complete_in_any_order() {
        let workers = Workers::new(Parallelism::default()).unwrap();
        let tasks: Vec<_> = (0..32u64).map(|i| workers.submit(move || i * i)).collect();
        let results: Vec<_> = tasks.into_iter().map(|t| t.wait().unwrap()).collect();
        assert_eq!(results, (0..32u64).map(|i| i * i).collect::<Vec<_>>());
    }
}
