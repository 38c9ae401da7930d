//! Fetch an artifact and stream it into the container.

use crate::canceller::Canceller;
use crate::error::{EmittableError, StepError, StepResult};
use crate::limiter::RateLimiter;
use crate::port::container::{Container, StreamInSpec};
use crate::port::log_streamer::{LogStreamer, emit_stderr, emit_stdout};
use crate::port::transfer::{ArtifactFetcher, ChecksumInfo};
use crate::step::Step;
use crate::steps::text::{format_byte_size, truncate_error_text};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{error, info};
use url::Url;

const DOWNLOAD_FAILED: &str = "Downloading failed";
const STREAM_IN_FAILED: &str = "Copying into the container failed";

/// What to download and where to put it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DownloadAction {
    /// Source URL. Never echoed to users.
    pub from: String,
    /// Destination path inside the container.
    pub to: String,
    pub cache_key: String,
    pub user: Option<String>,
    /// Human-readable label; without it the step emits nothing.
    pub artifact: Option<String>,
    pub checksum: ChecksumInfo,
}

impl DownloadAction {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            ..Default::default()
        }
    }

    pub fn with_cache_key(mut self, key: impl Into<String>) -> Self {
        self.cache_key = key.into();
        self
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn with_artifact(mut self, artifact: impl Into<String>) -> Self {
        self.artifact = Some(artifact.into());
        self
    }

    pub fn with_checksum(mut self, checksum: ChecksumInfo) -> Self {
        self.checksum = checksum;
        self
    }
}

pub struct DownloadStep {
    container: Arc<dyn Container>,
    action: DownloadAction,
    fetcher: Arc<dyn ArtifactFetcher>,
    rate_limiter: RateLimiter,
    streamer: Arc<dyn LogStreamer>,
    canceller: Canceller,
}

impl DownloadStep {
    pub fn new(
        container: Arc<dyn Container>,
        action: DownloadAction,
        fetcher: Arc<dyn ArtifactFetcher>,
        rate_limiter: RateLimiter,
        streamer: Arc<dyn LogStreamer>,
    ) -> Self {
        Self {
            container,
            action,
            fetcher,
            rate_limiter,
            streamer,
            canceller: Canceller::new(),
        }
    }

    fn emit_stdout(&self, text: String) {
        if self.action.artifact.is_some() {
            emit_stdout(&*self.streamer, &text);
        }
    }

    fn emit_stderr(&self, text: String) {
        if self.action.artifact.is_some() {
            emit_stderr(&*self.streamer, &truncate_error_text(&text));
        }
    }

    async fn perform_download(&self) -> StepResult {
        let url = Url::parse(&self.action.from).map_err(|err| {
            error!(error = %err, "parse request uri error");
            StepError::other(err)
        })?;

        if let Some(artifact) = &self.action.artifact {
            self.emit_stdout(format!("Downloading {}...\n", artifact));
        }

        info!("fetch starting");
        let fetched = self
            .fetcher
            .fetch(
                &url,
                &self.action.cache_key,
                &self.action.checksum,
                self.canceller.token(),
            )
            .await;
        let (stream, size) = match fetched {
            Ok(fetched) => fetched,
            Err(err) => {
                if self.canceller.is_cancelled() {
                    info!("fetch cancelled");
                    return Err(StepError::Cancelled);
                }
                error!(error = %err, "fetch failed");
                self.emit_stderr(format!("{}\n", DOWNLOAD_FAILED));
                return Err(EmittableError::wrap(err, DOWNLOAD_FAILED).into());
            }
        };
        info!(size, "fetch complete");

        info!(destination = %self.action.to, "stream in starting");
        let stream_in = self.container.stream_in(StreamInSpec {
            path: self.action.to.clone(),
            user: self.action.user.clone(),
            stream,
        });
        let streamed = tokio::select! {
            biased;
            _ = self.canceller.cancelled() => {
                info!("stream in cancelled");
                return Err(StepError::Cancelled);
            }
            streamed = stream_in => streamed,
        };
        if let Err(err) = streamed {
            if self.canceller.is_cancelled() {
                return Err(StepError::Cancelled);
            }
            error!(error = %err, "stream in failed");
            self.emit_stderr(format!("{}: {}\n", STREAM_IN_FAILED, err));
            return Err(EmittableError::wrap(err, STREAM_IN_FAILED).into());
        }
        info!("stream in complete");

        if let Some(artifact) = &self.action.artifact {
            if size > 0 {
                self.emit_stdout(format!(
                    "Downloaded {} ({})\n",
                    artifact,
                    format_byte_size(size)
                ));
            } else {
                self.emit_stdout(format!("Downloaded {}\n", artifact));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Step for DownloadStep {
    async fn perform(&self) -> StepResult {
        info!("acquiring limiter");
        let _permit = self.rate_limiter.acquire(&self.canceller).await?;
        info!("acquired limiter");

        self.perform_download().await
    }

    fn cancel(&self) {
        self.canceller.cancel();
    }
}
