//! # hodei-steps-testing
//!
//! Test doubles for every port consumed by `hodei-steps-core`, plus a
//! log capture helper and tar builders. Fakes record what they were asked to do and can be
//! scripted to fail, hang or hold until released.

pub mod archive;
pub mod fake_container;
pub mod fake_step;
pub mod fake_transfer;
pub mod log_capture;
pub mod recording_streamer;
pub mod wait;

pub use archive::{tar_archive, tar_entries};
pub use fake_container::{FakeContainer, FakeProcess, StreamedIn};
pub use fake_step::FakeStep;
pub use fake_transfer::{FakeFetcher, FakeUploader, FetchCall, UploadCall};
pub use log_capture::{LogCapture, capture_logs};
pub use recording_streamer::RecordingStreamer;
pub use wait::{FailingReader, eventually};
