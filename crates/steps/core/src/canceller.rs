//! One-shot cancellation signal observable by any number of waiters.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio_util::sync::CancellationToken;

/// Idempotent, thread-safe cancellation signal.
///
/// Every step owns one. `cancel` closes the signal exactly once; later
/// calls are no-ops. Clones observe the same signal.
#[derive(Debug, Clone, Default)]
pub struct Canceller {
    token: CancellationToken,
    fired: Arc<AtomicBool>,
}

impl Canceller {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire the signal. Returns `true` only for the call that actually fired it.
    pub fn cancel(&self) -> bool {
        let first = self
            .fired
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if first {
            self.token.cancel();
        }
        first
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Completes once the signal has fired (immediately if it already has).
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// Token handed to collaborators that accept a cancellation context.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}
