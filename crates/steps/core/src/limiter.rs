//! Bounded semaphore shared by transfer steps.

use crate::canceller::Canceller;
use crate::error::StepError;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

/// Caps the number of concurrent artifact transfers.
///
/// Cloning shares the same slots, so one limiter can be handed to many
/// steps belonging to unrelated containers.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl RateLimiter {
    pub fn new(capacity: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots currently free.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Wait for a slot or for cancellation, whichever comes first.
    ///
    /// A canceller that already fired wins without touching the semaphore.
    /// The slot is released when the returned permit is dropped.
    pub async fn acquire(&self, canceller: &Canceller) -> Result<OwnedSemaphorePermit, StepError> {
        tokio::select! {
            biased;
            _ = canceller.cancelled() => {
                debug!("rate limiter acquisition cancelled");
                Err(StepError::Cancelled)
            }
            permit = self.semaphore.clone().acquire_owned() => {
                permit.map_err(|_| StepError::other("rate limiter closed"))
            }
        }
    }
}
