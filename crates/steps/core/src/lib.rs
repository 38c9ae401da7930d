//! # hodei-steps-core
//!
//! Composable, cancellable units of work for driving a single container
//! through its lifecycle: fetch artifacts, run processes, upload results
//! and monitor health.
//!
//! ## Modules
//!
//! - [`step`]: the [`Step`] contract every unit of work implements
//! - [`canceller`]: one-shot broadcast [`Canceller`]
//! - [`error`]: [`StepError`], [`EmittableError`], [`AggregateError`]
//! - [`port`]: collaborator interfaces (container runtime, artifact transfer, log sink, clock)
//! - [`limiter`] / [`work_pool`]: shared bounded concurrency for transfers and probes
//! - [`config`]: [`StepsConfig`] and the [`StepEnvironment`] built from it
//! - [`steps`]: every step variant
//!
//! ## Usage
//!
//! ```rust,no_run
//! use hodei_steps_core::{ParallelStep, SharedStep, Step};
//! use std::sync::Arc;
//!
//! # async fn example(fetch_app: SharedStep, fetch_buildpack: SharedStep) {
//! let root: SharedStep = Arc::new(ParallelStep::new(vec![fetch_app, fetch_buildpack]));
//!
//! let handle = {
//!     let root = root.clone();
//!     tokio::spawn(async move { root.perform().await })
//! };
//!
//! // Any task may cancel, before or during perform.
//! root.cancel();
//! let _ = handle.await;
//! # }
//! ```

pub mod canceller;
pub mod config;
pub mod error;
pub mod limiter;
pub mod port;
pub mod step;
pub mod steps;
pub mod work_pool;

pub use canceller::Canceller;
pub use config::{StepEnvironment, StepsConfig};
pub use error::{AggregateError, BoxError, EmittableError, StepError, StepResult};
pub use limiter::RateLimiter;
pub use port::{
    ArtifactFetcher, BufferStreamer, ByteStream, ChecksumInfo, Clock, Container, ContainerInfo,
    LogStreamer, Process, ProcessIo, ProcessSpec, ResourceLimits, SharedBuffer, Signal,
    StreamInSpec, StreamOutSpec, Timer, TokioClock, TracingStreamer, Uploader,
};
pub use step::{SharedStep, Step};
pub use steps::{
    CodependentStep, DownloadAction, DownloadStep, EXIT_TIMEOUT, EmitProgressStep,
    LongRunningMonitorStep, MonitorStep, NetworkEnvironment, OutputWrapperStep, ParallelStep,
    ProbeFactory, RunStep, SerialStep, TERMINATE_TIMEOUT, TryStep, UploadAction, UploadStep,
};
pub use work_pool::{Submission, WorkPool};
