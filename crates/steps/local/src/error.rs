//! # Local Adapter Errors
//!
//! Failures raised by the host-process container and the filesystem
//! artifact store. They cross the port boundary boxed, so callers see the
//! `Display` text verbatim.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LocalError {
    #[error("failed to spawn {path}: {source}")]
    Spawn {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("path escapes container root: {0}")]
    PathEscapesRoot(String),

    #[error("unsupported url scheme: {0}")]
    UnsupportedScheme(String),

    #[error("url does not name a local file: {0}")]
    NotAFilePath(String),

    #[error("unsupported checksum algorithm: {0}")]
    UnsupportedChecksumAlgorithm(String),

    #[error("checksum mismatch for {path}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("process {0} has no pid")]
    NoPid(String),

    #[error("signals are not supported on this platform")]
    SignalsUnsupported,

    #[error("context canceled")]
    Cancelled,

    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type LocalResult<T> = Result<T, LocalError>;
