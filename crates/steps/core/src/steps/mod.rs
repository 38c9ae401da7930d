//!
//! # Step Variants
//!
//! Leaf actions (run, download, upload), composites (parallel,
//! codependent, serial, try, output wrapper, emit progress) and the two
//! health monitors.
//!

pub mod codependent;
pub mod download;
pub mod emit_progress;
pub mod long_running_monitor;
pub mod monitor;
pub mod output_wrapper;
pub mod parallel;
pub mod run;
pub mod serial;
pub mod text;
pub mod try_step;
pub mod upload;

pub use codependent::CodependentStep;
pub use download::{DownloadAction, DownloadStep};
pub use emit_progress::EmitProgressStep;
pub use long_running_monitor::LongRunningMonitorStep;
pub use monitor::{MonitorStep, ProbeFactory};
pub use output_wrapper::OutputWrapperStep;
pub use parallel::ParallelStep;
pub use run::{EXIT_TIMEOUT, NetworkEnvironment, PortMapping, RunStep, TERMINATE_TIMEOUT};
pub use serial::SerialStep;
pub use text::{format_byte_size, format_duration};
pub use try_step::TryStep;
pub use upload::{
    ERR_ESTABLISH_STREAM, ERR_READ_STREAM, ERR_READ_TAR, UploadAction, UploadStep,
};
