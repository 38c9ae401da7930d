//! Stream content out of the container and upload it.
//!
//! Stream-out yields a tar archive. A lone regular file is uploaded as its
//! own contents; anything else is uploaded as the gzipped archive.

use crate::canceller::Canceller;
use crate::error::{EmittableError, StepError, StepResult};
use crate::limiter::RateLimiter;
use crate::port::container::{Container, StreamOutSpec};
use crate::port::log_streamer::{LogStreamer, emit_stderr, emit_stdout};
use crate::port::transfer::Uploader;
use crate::step::Step;
use crate::steps::text::format_byte_size;
use async_trait::async_trait;
use flate2::Compression;
use flate2::write::GzEncoder;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;
use tracing::{error, info};
use url::Url;

/// Stream-out could not be initiated.
pub const ERR_ESTABLISH_STREAM: &str = "Failed to establish stream from container";

/// The stream opened but could not be read to completion.
pub const ERR_READ_STREAM: &str = "Failed to read stream from container";

/// The streamed-out archive has no readable first entry.
pub const ERR_READ_TAR: &str = "Failed to find first item in tar stream";

/// What to upload and where to send it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadAction {
    /// Source path inside the container.
    pub from: String,
    /// Destination URL. Never echoed to users.
    pub to: String,
    pub user: Option<String>,
    /// Human-readable label; without it the step emits nothing.
    pub artifact: Option<String>,
}

impl UploadAction {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            ..Default::default()
        }
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn with_artifact(mut self, artifact: impl Into<String>) -> Self {
        self.artifact = Some(artifact.into());
        self
    }
}

pub struct UploadStep {
    container: Arc<dyn Container>,
    action: UploadAction,
    uploader: Arc<dyn Uploader>,
    rate_limiter: RateLimiter,
    streamer: Arc<dyn LogStreamer>,
    temp_dir: PathBuf,
    canceller: Canceller,
}

impl UploadStep {
    pub fn new(
        container: Arc<dyn Container>,
        action: UploadAction,
        uploader: Arc<dyn Uploader>,
        rate_limiter: RateLimiter,
        streamer: Arc<dyn LogStreamer>,
        temp_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            container,
            action,
            uploader,
            rate_limiter,
            streamer,
            temp_dir: temp_dir.into(),
            canceller: Canceller::new(),
        }
    }

    /// Stream the container contents out and package them for upload.
    async fn stage(&self) -> Result<NamedTempFile, StepError> {
        let archive = self.spool().await?;
        let temp_dir = self.temp_dir.clone();
        tokio::task::spawn_blocking(move || package(archive.path(), &temp_dir))
            .await
            .map_err(StepError::other)?
    }

    /// Copy the stream-out archive into a local scratch file.
    async fn spool(&self) -> Result<NamedTempFile, StepError> {
        let mut stream = self
            .container
            .stream_out(StreamOutSpec {
                path: self.action.from.clone(),
                user: self.action.user.clone(),
            })
            .await
            .map_err(|err| {
                info!(error = %err, "failed to stream out");
                StepError::from(EmittableError::wrap(err, ERR_ESTABLISH_STREAM))
            })?;

        let staged = NamedTempFile::new_in(&self.temp_dir).map_err(|err| {
            error!(error = %err, "failed to create temp file");
            StepError::other(err)
        })?;
        let mut file = tokio::fs::File::from_std(staged.reopen().map_err(StepError::other)?);

        tokio::io::copy(&mut stream, &mut file).await.map_err(|err| {
            info!(error = %err, "failed to read stream");
            StepError::from(EmittableError::wrap(err, ERR_READ_STREAM))
        })?;
        file.flush().await.map_err(StepError::other)?;

        Ok(staged)
    }

    async fn perform_upload(&self, url: Url) -> StepResult {
        if let Some(artifact) = &self.action.artifact {
            emit_stdout(&*self.streamer, &format!("Uploading {}...\n", artifact));
        }

        let staged = tokio::select! {
            biased;
            _ = self.canceller.cancelled() => return Err(StepError::Cancelled),
            staged = self.stage() => staged?,
        };

        let uploaded = self
            .uploader
            .upload(staged.path(), &url, self.canceller.token())
            .await;
        let size = match uploaded {
            Ok(size) => size,
            Err(err) => {
                if self.canceller.is_cancelled() {
                    info!("upload cancelled");
                    return Err(StepError::Cancelled);
                }
                error!(error = %err, "failed to upload");
                if let Some(artifact) = &self.action.artifact {
                    emit_stderr(
                        &*self.streamer,
                        &format!("Failed to upload payload for {}\n", artifact),
                    );
                }
                return Err(StepError::Other(err));
            }
        };

        if let Some(artifact) = &self.action.artifact {
            emit_stdout(
                &*self.streamer,
                &format!("Uploaded {} ({})\n", artifact, format_byte_size(size)),
            );
        }
        info!(size, "upload successful");
        Ok(())
    }
}

/// Extract a lone regular file from `archive`, or gzip the whole archive.
fn package(archive: &Path, temp_dir: &Path) -> Result<NamedTempFile, StepError> {
    let read_tar = |err: io::Error| {
        info!(error = %err, "failed to read tar stream");
        StepError::from(EmittableError::wrap(err, ERR_READ_TAR))
    };

    let mut reader = tar::Archive::new(File::open(archive).map_err(StepError::other)?);
    let mut entries = reader.entries().map_err(read_tar)?;
    let mut first = match entries.next() {
        Some(entry) => entry.map_err(read_tar)?,
        None => {
            return Err(read_tar(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "empty tar stream",
            )));
        }
    };
    if !first.header().entry_type().is_file() {
        return compress(archive, temp_dir);
    }

    let mut payload = NamedTempFile::new_in(temp_dir).map_err(StepError::other)?;
    io::copy(&mut first, &mut payload).map_err(read_tar)?;
    drop(first);
    match entries.next() {
        None => Ok(payload),
        Some(Err(err)) => Err(read_tar(err)),
        Some(Ok(_)) => compress(archive, temp_dir),
    }
}

fn compress(archive: &Path, temp_dir: &Path) -> Result<NamedTempFile, StepError> {
    info!("compressing archive");
    let mut source = File::open(archive).map_err(StepError::other)?;
    let compressed = NamedTempFile::new_in(temp_dir).map_err(StepError::other)?;
    let mut encoder = GzEncoder::new(compressed, Compression::default());
    io::copy(&mut source, &mut encoder).map_err(StepError::other)?;
    encoder.finish().map_err(StepError::other)
}

#[async_trait]
impl Step for UploadStep {
    async fn perform(&self) -> StepResult {
        info!(source = %self.action.from, "upload starting");

        let url = Url::parse(&self.action.to).map_err(|err| {
            error!(error = %err, "failed to parse url");
            StepError::other(err)
        })?;

        info!("acquiring limiter");
        let _permit = self.rate_limiter.acquire(&self.canceller).await?;
        info!("acquired limiter");

        self.perform_upload(url).await
    }

    fn cancel(&self) {
        self.canceller.cancel();
    }
}
