//! Ordered execution of substeps.

use crate::error::StepResult;
use crate::step::{SharedStep, Step};
use async_trait::async_trait;
use tracing::debug;

/// Performs substeps one after another and stops at the first failure,
/// which is returned unchanged.
pub struct SerialStep {
    substeps: Vec<SharedStep>,
}

impl SerialStep {
    pub fn new(substeps: Vec<SharedStep>) -> Self {
        Self { substeps }
    }
}

#[async_trait]
impl Step for SerialStep {
    async fn perform(&self) -> StepResult {
        for (index, substep) in self.substeps.iter().enumerate() {
            if let Err(err) = substep.perform().await {
                debug!(index, error = %err, "serial step stopped");
                return Err(err);
            }
        }
        Ok(())
    }

    fn cancel(&self) {
        for substep in &self.substeps {
            substep.cancel();
        }
    }
}
