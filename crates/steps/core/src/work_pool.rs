//! Bounded-concurrency executor for health-check probes.

use crate::error::StepError;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::trace;

/// Runs submitted work on spawned tasks, at most `size` at a time.
///
/// Submission never blocks; work queues on the pool's semaphore until a
/// worker slot frees up.
#[derive(Debug, Clone)]
pub struct WorkPool {
    semaphore: Arc<Semaphore>,
    size: usize,
}

impl WorkPool {
    pub fn new(size: usize) -> Result<Self, StepError> {
        if size == 0 {
            return Err(StepError::configuration("work pool size must be positive"));
        }
        Ok(Self {
            semaphore: Arc::new(Semaphore::new(size)),
            size,
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Workers not currently busy.
    pub fn idle(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn submit<F>(&self, work: F) -> Submission
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let semaphore = self.semaphore.clone();
        let claimed = Arc::new(AtomicBool::new(false));
        let task = {
            let claimed = claimed.clone();
            tokio::spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    trace!("work pool closed, dropping work");
                    return;
                };
                if claim(&claimed) {
                    work.await;
                }
            })
        };
        Submission { claimed, task }
    }
}

fn claim(flag: &AtomicBool) -> bool {
    flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
        .is_ok()
}

/// Handle to work queued on a [`WorkPool`].
#[derive(Debug)]
pub struct Submission {
    claimed: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl Submission {
    /// Take the work back if no worker has started it yet.
    ///
    /// Returns `false` once the work is running; it then runs to completion.
    pub fn withdraw(&self) -> bool {
        if !claim(&self.claimed) {
            return false;
        }
        self.task.abort();
        true
    }
}
