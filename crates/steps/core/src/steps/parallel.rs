//! Fan-out / fan-in over independent substeps.

use crate::error::{AggregateError, StepError, StepResult};
use crate::step::{SharedStep, Step};
use async_trait::async_trait;
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// Performs every substep concurrently and waits for all of them.
///
/// Failures are collected into an [`AggregateError`]; a failing substep
/// never short-circuits its siblings.
pub struct ParallelStep {
    substeps: Vec<SharedStep>,
}

impl ParallelStep {
    pub fn new(substeps: Vec<SharedStep>) -> Self {
        Self { substeps }
    }
}

/// Spawn each substep and drain exactly one outcome per spawned task.
pub(crate) fn spawn_all(substeps: &[SharedStep]) -> JoinSet<StepResult> {
    let mut set = JoinSet::new();
    for substep in substeps {
        let substep = substep.clone();
        set.spawn(async move { substep.perform().await });
    }
    set
}

/// Map a join outcome onto a step outcome. A panicked substep is a failure.
pub(crate) fn flatten_join(
    joined: Result<StepResult, tokio::task::JoinError>,
) -> StepResult {
    match joined {
        Ok(result) => result,
        Err(err) if err.is_cancelled() => Err(StepError::Cancelled),
        Err(err) => {
            warn!(error = %err, "substep task panicked");
            Err(StepError::other(err))
        }
    }
}

#[async_trait]
impl Step for ParallelStep {
    async fn perform(&self) -> StepResult {
        debug!(substeps = self.substeps.len(), "performing parallel step");
        let mut set = spawn_all(&self.substeps);

        let mut aggregate = AggregateError::new();
        while let Some(joined) = set.join_next().await {
            if let Err(err) = flatten_join(joined) {
                aggregate.push(err);
            }
        }
        aggregate.into_result()
    }

    fn cancel(&self) {
        for substep in &self.substeps {
            substep.cancel();
        }
    }
}
