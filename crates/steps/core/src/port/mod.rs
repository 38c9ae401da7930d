//!
//! # Ports
//!
//! Collaborator interfaces consumed by the steps. Adapters implement them
//! in separate crates.
//!

pub mod clock;
pub mod container;
pub mod log_streamer;
pub mod transfer;

pub use clock::{Clock, Timer, TokioClock};
pub use container::{
    ByteStream, Container, ContainerInfo, Process, ProcessIo, ProcessSpec, ResourceLimits,
    Signal, StreamInSpec, StreamOutSpec,
};
pub use log_streamer::{
    BufferStreamer, LogStreamer, SharedBuffer, TracingStreamer, emit_stderr, emit_stdout,
};
pub use transfer::{ArtifactFetcher, ChecksumInfo, Uploader};
