//! Two-phase health monitoring: one readiness probe, then one liveness probe.

use crate::canceller::Canceller;
use crate::error::{StepError, StepResult};
use crate::port::log_streamer::{LogStreamer, emit_stderr, emit_stdout};
use crate::step::{SharedStep, Step};
use crate::steps::monitor::{
    HEALTHY_MESSAGE, STARTING_MESSAGE, UNHEALTHY_MESSAGE, never_healthy_error, notify_healthy,
    timed_out_message, unhealthy_error,
};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::info;

/// Readiness runs once and must succeed; liveness then runs once and is
/// expected to keep running until it fails or is cancelled.
///
/// The probes do their own polling (typically a long-lived health-check
/// process), so this step holds no timers.
pub struct LongRunningMonitorStep {
    readiness: SharedStep,
    liveness: SharedStep,
    healthy_notifier: mpsc::Sender<()>,
    streamer: Arc<dyn LogStreamer>,
    health_check_streamer: Arc<dyn LogStreamer>,
    start_timeout: Duration,
    canceller: Canceller,
}

impl LongRunningMonitorStep {
    pub fn new(
        readiness: SharedStep,
        liveness: SharedStep,
        healthy_notifier: mpsc::Sender<()>,
        streamer: Arc<dyn LogStreamer>,
        health_check_streamer: Arc<dyn LogStreamer>,
        start_timeout: Duration,
    ) -> Self {
        Self {
            readiness,
            liveness,
            healthy_notifier,
            streamer,
            health_check_streamer,
            start_timeout,
            canceller: Canceller::new(),
        }
    }

    /// Perform `probe`, forwarding cancellation to it. A cancelled probe's
    /// own result is returned rather than a synthesized cancellation.
    async fn run_probe(&self, probe: &SharedStep) -> StepResult {
        if self.canceller.is_cancelled() {
            probe.cancel();
            return probe.perform().await;
        }
        let performing = probe.perform();
        tokio::pin!(performing);

        tokio::select! {
            result = &mut performing => result,
            _ = self.canceller.cancelled() => {
                probe.cancel();
                performing.await
            }
        }
    }

    fn report_probe_failure(&self, err: &StepError) {
        emit_stderr(&*self.health_check_streamer, &format!("{}\n", err));
    }
}

#[async_trait]
impl Step for LongRunningMonitorStep {
    async fn perform(&self) -> StepResult {
        emit_stdout(&*self.streamer, STARTING_MESSAGE);

        let readiness = self.run_probe(&self.readiness).await;
        if self.canceller.is_cancelled() {
            return readiness;
        }
        if let Err(err) = readiness {
            info!(error = %err, "timed out before healthy");
            self.report_probe_failure(&err);
            emit_stderr(&*self.streamer, &timed_out_message(self.start_timeout));
            return Err(never_healthy_error(self.start_timeout, err));
        }

        info!("transitioned to healthy");
        emit_stdout(&*self.streamer, HEALTHY_MESSAGE);
        notify_healthy(&self.healthy_notifier);

        let liveness = self.run_probe(&self.liveness).await;
        if self.canceller.is_cancelled() {
            return liveness;
        }
        let err = match liveness {
            Err(err) => err,
            Ok(()) => StepError::other("liveness check exited"),
        };
        info!(error = %err, "transitioned to unhealthy");
        self.report_probe_failure(&err);
        emit_stdout(&*self.streamer, UNHEALTHY_MESSAGE);
        Err(unhealthy_error(err))
    }

    fn cancel(&self) {
        self.canceller.cancel();
    }
}
