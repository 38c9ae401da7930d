//! Replaces a substep's error with text captured on a side channel.

use crate::error::{EmittableError, StepError, StepResult};
use crate::port::container::ByteStream;
use crate::step::{SharedStep, Step};
use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::sync::Mutex;
use tracing::debug;

/// On failure, drains `reader` and, if it produced any text, returns that
/// text as an [`EmittableError`] wrapping the original error.
///
/// Typically the reader is the buffer a health-check process wrote its
/// output into, so the user sees the check's own explanation.
pub struct OutputWrapperStep {
    substep: SharedStep,
    reader: Mutex<ByteStream>,
}

impl OutputWrapperStep {
    pub fn new(substep: SharedStep, reader: ByteStream) -> Self {
        Self {
            substep,
            reader: Mutex::new(reader),
        }
    }
}

#[async_trait]
impl Step for OutputWrapperStep {
    async fn perform(&self) -> StepResult {
        let err = match self.substep.perform().await {
            Ok(()) => return Ok(()),
            Err(err) => err,
        };

        let mut output = Vec::new();
        self.reader
            .lock()
            .await
            .read_to_end(&mut output)
            .await
            .map_err(StepError::other)?;

        let text = String::from_utf8_lossy(&output);
        let text = text.trim();
        if text.is_empty() {
            return Err(err);
        }
        debug!(original = %err, "substituting captured output for error");
        Err(EmittableError::wrap(err, text).into())
    }

    fn cancel(&self) {
        self.substep.cancel();
    }
}
