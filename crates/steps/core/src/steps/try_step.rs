//! Wrapper that can never fail.

use crate::error::StepResult;
use crate::step::{SharedStep, Step};
use async_trait::async_trait;
use tracing::info;

/// Performs the substep and swallows its failure after logging it.
pub struct TryStep {
    substep: SharedStep,
    action: String,
}

impl TryStep {
    pub fn new(substep: SharedStep) -> Self {
        Self {
            substep,
            action: "try".to_string(),
        }
    }

    /// Label used when logging a swallowed failure.
    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = action.into();
        self
    }
}

#[async_trait]
impl Step for TryStep {
    async fn perform(&self) -> StepResult {
        if let Err(err) = self.substep.perform().await {
            info!(action = %self.action, error = %err, "failed");
        }
        Ok(())
    }

    fn cancel(&self) {
        self.substep.cancel();
    }
}
