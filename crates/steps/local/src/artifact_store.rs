//! Filesystem-backed artifact transfer for `file://` URLs.
//!
//! Fetched artifacts are handed out as tar streams, ready to stream into a
//! container: gzipped tarballs are inflated, tarballs pass through and any
//! other file becomes a single entry named after itself.

use crate::error::{LocalError, LocalResult};
use async_trait::async_trait;
use flate2::read::GzDecoder;
use hodei_steps_core::{ArtifactFetcher, BoxError, ByteStream, ChecksumInfo, Uploader};
use sha2::{Digest, Sha256};
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use url::Url;

/// Serves downloads from and writes uploads to the local filesystem.
#[derive(Debug, Clone, Default)]
pub struct FsArtifactStore;

impl FsArtifactStore {
    pub fn new() -> Self {
        Self
    }
}

fn file_path(url: &Url) -> LocalResult<PathBuf> {
    if url.scheme() != "file" {
        return Err(LocalError::UnsupportedScheme(url.scheme().to_string()));
    }
    url.to_file_path()
        .map_err(|_| LocalError::NotAFilePath(url.to_string()))
}

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// ustar magic at offset 257, written by both POSIX and GNU tar.
fn is_tar(data: &[u8]) -> bool {
    data.get(257..262) == Some(b"ustar".as_slice())
}

fn as_tar(path: &Path, data: Vec<u8>) -> LocalResult<Vec<u8>> {
    if data.starts_with(&GZIP_MAGIC) {
        let mut archive = Vec::new();
        GzDecoder::new(data.as_slice()).read_to_end(&mut archive)?;
        return Ok(archive);
    }
    if is_tar(&data) {
        return Ok(data);
    }

    let name = path
        .file_name()
        .ok_or_else(|| LocalError::NotAFilePath(path.display().to_string()))?;
    let mut header = tar::Header::new_gnu();
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    let mut builder = tar::Builder::new(Vec::new());
    builder.append_data(&mut header, name, data.as_slice())?;
    Ok(builder.into_inner()?)
}

fn verify_checksum(path: &Path, data: &[u8], checksum: &ChecksumInfo) -> LocalResult<()> {
    if checksum.is_empty() {
        return Ok(());
    }

    let actual = match checksum.algorithm.to_ascii_lowercase().as_str() {
        "sha256" => format!("{:x}", Sha256::digest(data)),
        other => return Err(LocalError::UnsupportedChecksumAlgorithm(other.to_string())),
    };
    if !actual.eq_ignore_ascii_case(&checksum.value) {
        return Err(LocalError::ChecksumMismatch {
            path: path.to_path_buf(),
            expected: checksum.value.clone(),
            actual,
        });
    }
    Ok(())
}

#[async_trait]
impl ArtifactFetcher for FsArtifactStore {
    async fn fetch(
        &self,
        url: &Url,
        cache_key: &str,
        checksum: &ChecksumInfo,
        cancel: CancellationToken,
    ) -> Result<(ByteStream, u64), BoxError> {
        let path = file_path(url)?;
        debug!(path = %path.display(), cache_key, "fetching artifact");

        let data = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(LocalError::Cancelled.into()),
            data = tokio::fs::read(&path) => data?,
        };
        verify_checksum(&path, &data, checksum)?;

        let archive = tokio::task::spawn_blocking(move || as_tar(&path, data)).await??;
        let size = archive.len() as u64;
        Ok((Box::new(Cursor::new(archive)), size))
    }
}

#[async_trait]
impl Uploader for FsArtifactStore {
    async fn upload(
        &self,
        file: &Path,
        to: &Url,
        cancel: CancellationToken,
    ) -> Result<u64, BoxError> {
        let destination = file_path(to)?;
        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let copied = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(LocalError::Cancelled.into()),
            copied = tokio::fs::copy(file, &destination) => copied?,
        };

        info!(
            source = %file.display(),
            destination = %destination.display(),
            bytes = copied,
            "artifact uploaded"
        );
        Ok(copied)
    }
}
