//!
//! # Step
//!
//! The uniform contract for an executable, cancellable unit of work.
//!

use crate::error::StepResult;
use async_trait::async_trait;
use std::sync::Arc;

/// A unit of work that can be performed once and cancelled at any time.
///
/// `perform` runs the work to completion and returns its outcome; an
/// interrupted run reports [`StepError::Cancelled`](crate::StepError::Cancelled).
/// `cancel` may be invoked from any task, any number of times, before,
/// during or after `perform`. Cancelling before `perform` makes `perform`
/// return promptly. `cancel` never blocks.
#[async_trait]
pub trait Step: Send + Sync {
    /// Execute the step's work.
    async fn perform(&self) -> StepResult;

    /// Request cooperative cancellation. Idempotent.
    fn cancel(&self);
}

/// Shared handle to a step. Composites hold their substeps this way so the
/// substeps can be performed on other tasks and cancelled from elsewhere.
pub type SharedStep = Arc<dyn Step>;

#[async_trait]
impl<S: Step + ?Sized> Step for Arc<S> {
    async fn perform(&self) -> StepResult {
        (**self).perform().await
    }

    fn cancel(&self) {
        (**self).cancel()
    }
}

#[async_trait]
impl<S: Step + ?Sized> Step for Box<S> {
    async fn perform(&self) -> StepResult {
        (**self).perform().await
    }

    fn cancel(&self) {
        (**self).cancel()
    }
}
