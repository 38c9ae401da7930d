//!
//! # Monitor Step
//!
//! Periodic health probing. Probes run on the shared [`WorkPool`] at the
//! unhealthy interval until the first success, then at the healthy
//! interval. The monitor ends on the first failure after becoming healthy,
//! or when the optional start timeout passes without a healthy probe.
//!

use crate::canceller::Canceller;
use crate::error::{EmittableError, StepError, StepResult};
use crate::port::clock::Clock;
use crate::port::log_streamer::{LogStreamer, emit_stderr, emit_stdout};
use crate::step::{SharedStep, Step};
use crate::steps::text::format_duration;
use crate::work_pool::WorkPool;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

/// Produces a fresh probe for every tick.
pub type ProbeFactory = Box<dyn Fn() -> SharedStep + Send + Sync>;

pub(crate) const STARTING_MESSAGE: &str = "Starting health monitoring of container\n";
pub(crate) const HEALTHY_MESSAGE: &str = "Container became healthy\n";
pub(crate) const UNHEALTHY_MESSAGE: &str = "Container became unhealthy\n";

pub(crate) fn timed_out_message(timeout: Duration) -> String {
    format!(
        "Timed out after {}: health check never passed.\n",
        format_duration(timeout)
    )
}

pub(crate) fn unhealthy_error(err: StepError) -> StepError {
    let message = format!("Instance became unhealthy: {}", err);
    EmittableError::wrap(err, message).into()
}

pub(crate) fn never_healthy_error(timeout: Duration, err: StepError) -> StepError {
    let message = format!(
        "Instance never healthy after {}: {}",
        format_duration(timeout),
        err
    );
    EmittableError::wrap(err, message).into()
}

/// Signal that the container has become healthy. Never blocks.
pub(crate) fn notify_healthy(notifier: &mpsc::Sender<()>) {
    if notifier.try_send(()).is_err() {
        debug!("healthy notification not delivered");
    }
}

pub struct MonitorStep {
    check: ProbeFactory,
    healthy_notifier: mpsc::Sender<()>,
    streamer: Arc<dyn LogStreamer>,
    clock: Arc<dyn Clock>,
    start_timeout: Option<Duration>,
    healthy_interval: Duration,
    unhealthy_interval: Duration,
    work_pool: WorkPool,
    canceller: Canceller,
}

impl MonitorStep {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        check: ProbeFactory,
        healthy_notifier: mpsc::Sender<()>,
        streamer: Arc<dyn LogStreamer>,
        clock: Arc<dyn Clock>,
        start_timeout: Option<Duration>,
        healthy_interval: Duration,
        unhealthy_interval: Duration,
        work_pool: WorkPool,
    ) -> Self {
        Self {
            check,
            healthy_notifier,
            streamer,
            clock,
            start_timeout: start_timeout.filter(|t| !t.is_zero()),
            healthy_interval,
            unhealthy_interval,
            work_pool,
            canceller: Canceller::new(),
        }
    }

    /// Run one probe on the pool. Cancelled while still queued, the probe is
    /// withdrawn; cancelled while running, it is cancelled and its own
    /// result is returned.
    async fn probe(&self) -> StepResult {
        let probe = (self.check)();
        let (result_tx, mut result_rx) = oneshot::channel();
        let submission = {
            let probe = probe.clone();
            self.work_pool.submit(async move {
                let _ = result_tx.send(probe.perform().await);
            })
        };

        tokio::select! {
            result = &mut result_rx => result.unwrap_or(Err(StepError::Cancelled)),
            _ = self.canceller.cancelled() => {
                if submission.withdraw() {
                    debug!("health check withdrawn before it started");
                    return Err(StepError::Cancelled);
                }
                probe.cancel();
                result_rx.await.unwrap_or(Err(StepError::Cancelled))
            }
        }
    }
}

#[async_trait]
impl Step for MonitorStep {
    async fn perform(&self) -> StepResult {
        if self.healthy_interval.is_zero() || self.unhealthy_interval.is_zero() {
            return Err(StepError::configuration(format!(
                "the healthy ({}) and unhealthy ({}) intervals must be positive",
                format_duration(self.healthy_interval),
                format_duration(self.unhealthy_interval)
            )));
        }

        emit_stdout(&*self.streamer, STARTING_MESSAGE);

        let mut healthy = false;
        let mut start_by = self.start_timeout.map(|timeout| self.clock.now() + timeout);
        let mut interval = self.unhealthy_interval;
        let mut timer = self.clock.new_timer(interval);

        loop {
            let now = tokio::select! {
                _ = self.canceller.cancelled() => return Err(StepError::Cancelled),
                now = timer.fired() => now,
            };

            let result = self.probe().await;
            if self.canceller.is_cancelled() {
                return result;
            }

            match result {
                Ok(()) if !healthy => {
                    info!("transitioned to healthy");
                    emit_stdout(&*self.streamer, HEALTHY_MESSAGE);
                    healthy = true;
                    notify_healthy(&self.healthy_notifier);
                    interval = self.healthy_interval;
                    start_by = None;
                }
                Ok(()) => {}
                Err(err) if healthy => {
                    info!(error = %err, "transitioned to unhealthy");
                    emit_stdout(&*self.streamer, UNHEALTHY_MESSAGE);
                    return Err(unhealthy_error(err));
                }
                Err(err) => {
                    if let (Some(deadline), Some(timeout)) = (start_by, self.start_timeout) {
                        if now >= deadline {
                            info!(error = %err, "timed out before healthy");
                            emit_stderr(&*self.streamer, &timed_out_message(timeout));
                            return Err(never_healthy_error(timeout, err));
                        }
                    }
                    debug!(error = %err, "health check failed");
                }
            }

            timer.reset(interval);
        }
    }

    fn cancel(&self) {
        self.canceller.cancel();
    }
}
