//! Parallel group whose members live and die together.

use crate::canceller::Canceller;
use crate::error::{AggregateError, StepError, StepResult};
use crate::step::{SharedStep, Step};
use crate::steps::parallel::{flatten_join, spawn_all};
use async_trait::async_trait;
use tracing::{debug, info};

/// Runs substeps concurrently; the first failure cancels the whole group.
///
/// With `error_on_exit`, a member that finishes successfully while the
/// group is still live is also an anomaly: a [`StepError::CodependentExited`]
/// is recorded and the siblings are cancelled. Without it, the remaining
/// members keep running until they finish or the group is cancelled.
pub struct CodependentStep {
    substeps: Vec<SharedStep>,
    error_on_exit: bool,
    canceller: Canceller,
}

impl CodependentStep {
    pub fn new(substeps: Vec<SharedStep>, error_on_exit: bool) -> Self {
        Self {
            substeps,
            error_on_exit,
            canceller: Canceller::new(),
        }
    }

    fn cancel_group(&self) {
        if self.canceller.cancel() {
            for substep in &self.substeps {
                substep.cancel();
            }
        }
    }
}

#[async_trait]
impl Step for CodependentStep {
    async fn perform(&self) -> StepResult {
        debug!(
            substeps = self.substeps.len(),
            error_on_exit = self.error_on_exit,
            "performing codependent step"
        );
        let mut set = spawn_all(&self.substeps);

        let mut aggregate = AggregateError::new();
        while let Some(joined) = set.join_next().await {
            match flatten_join(joined) {
                Ok(()) => {
                    if self.error_on_exit && !self.canceller.is_cancelled() {
                        info!("codependent member exited, cancelling group");
                        aggregate.push(StepError::CodependentExited);
                        self.cancel_group();
                    }
                }
                Err(err) => {
                    if !err.is_cancelled() {
                        info!(error = %err, "codependent member failed, cancelling group");
                    }
                    aggregate.push(err);
                    self.cancel_group();
                }
            }
        }
        aggregate.into_result()
    }

    fn cancel(&self) {
        self.cancel_group();
    }
}
