//! Artifact transfer ports used by the download and upload steps.

use crate::error::BoxError;
use crate::port::container::ByteStream;
use async_trait::async_trait;
use std::path::Path;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Expected checksum of a fetched artifact.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChecksumInfo {
    pub algorithm: String,
    pub value: String,
}

impl ChecksumInfo {
    pub fn new(algorithm: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            algorithm: algorithm.into(),
            value: value.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.algorithm.is_empty() && self.value.is_empty()
    }
}

/// Fetches (possibly cached) artifacts as readable streams.
#[async_trait]
pub trait ArtifactFetcher: Send + Sync {
    /// Returns the artifact as a tar stream, ready for
    /// [`Container::stream_in`](crate::port::container::Container::stream_in),
    /// and the stream's size in bytes.
    ///
    /// Implementations must give up promptly once `cancel` fires.
    async fn fetch(
        &self,
        url: &Url,
        cache_key: &str,
        checksum: &ChecksumInfo,
        cancel: CancellationToken,
    ) -> Result<(ByteStream, u64), BoxError>;
}

/// Uploads a local file to a destination URL.
#[async_trait]
pub trait Uploader: Send + Sync {
    /// Returns the number of bytes uploaded.
    async fn upload(
        &self,
        file: &Path,
        to: &Url,
        cancel: CancellationToken,
    ) -> Result<u64, BoxError>;
}
