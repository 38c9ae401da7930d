//! Progress messages around a substep.

use crate::error::StepResult;
use crate::port::log_streamer::{LogStreamer, emit_stderr, emit_stdout};
use crate::step::{SharedStep, Step};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

/// Writes a start message before the substep runs and a success or failure
/// message after it completes. The substep's outcome passes through.
pub struct EmitProgressStep {
    substep: SharedStep,
    start_message: String,
    success_message: String,
    failure_message: String,
    streamer: Arc<dyn LogStreamer>,
}

impl EmitProgressStep {
    pub fn new(substep: SharedStep, streamer: Arc<dyn LogStreamer>) -> Self {
        Self {
            substep,
            start_message: String::new(),
            success_message: String::new(),
            failure_message: String::new(),
            streamer,
        }
    }

    pub fn with_start_message(mut self, message: impl Into<String>) -> Self {
        self.start_message = message.into();
        self
    }

    pub fn with_success_message(mut self, message: impl Into<String>) -> Self {
        self.success_message = message.into();
        self
    }

    pub fn with_failure_message(mut self, message: impl Into<String>) -> Self {
        self.failure_message = message.into();
        self
    }
}

#[async_trait]
impl Step for EmitProgressStep {
    async fn perform(&self) -> StepResult {
        if !self.start_message.is_empty() {
            emit_stdout(&*self.streamer, &format!("{}\n", self.start_message));
        }

        let result = self.substep.perform().await;

        match &result {
            Ok(()) => {
                if !self.success_message.is_empty() {
                    emit_stdout(&*self.streamer, &format!("{}\n", self.success_message));
                }
            }
            Err(err) => {
                let emitted = err.as_emittable().map(|emittable| {
                    info!(
                        wrapped_error = ?emittable.wrapped_error().map(|e| e.to_string()),
                        message_emitted = %emittable.message(),
                        "errored"
                    );
                    emittable.message()
                });

                if !self.failure_message.is_empty() {
                    let line = match emitted {
                        Some(message) => format!("{}: {}\n", self.failure_message, message),
                        None => format!("{}\n", self.failure_message),
                    };
                    emit_stderr(&*self.streamer, &line);
                }
            }
        }

        result
    }

    fn cancel(&self) {
        self.substep.cancel();
    }
}
