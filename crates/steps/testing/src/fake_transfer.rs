//! Fakes for the artifact transfer ports.

use async_trait::async_trait;
use hodei_steps_core::{ArtifactFetcher, BoxError, ByteStream, ChecksumInfo, Uploader};
use parking_lot::Mutex;
use std::io::Cursor;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Holds transfers until released or cancelled.
#[derive(Debug)]
struct Gate {
    closed: AtomicBool,
    permits: Semaphore,
}

impl Default for Gate {
    fn default() -> Self {
        Self {
            closed: AtomicBool::new(false),
            permits: Semaphore::new(0),
        }
    }
}

impl Gate {
    async fn pass(&self, cancel: &CancellationToken) -> Result<(), BoxError> {
        if !self.closed.load(Ordering::SeqCst) {
            return Ok(());
        }
        tokio::select! {
            permit = self.permits.acquire() => {
                permit.map(|p| p.forget()).map_err(|_| BoxError::from("gate closed"))
            }
            _ = cancel.cancelled() => Err(BoxError::from("context canceled")),
        }
    }
}

/// Arguments of one `fetch` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchCall {
    pub url: Url,
    pub cache_key: String,
    pub checksum: ChecksumInfo,
}

/// Serves fixed content, optionally after being released.
#[derive(Debug, Default)]
pub struct FakeFetcher {
    content: Mutex<Vec<u8>>,
    reported_size: Mutex<Option<u64>>,
    error: Mutex<Option<String>>,
    gate: Gate,
    calls: Mutex<Vec<FetchCall>>,
    in_flight: AtomicUsize,
}

impl FakeFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_content(self, content: impl Into<Vec<u8>>) -> Self {
        *self.content.lock() = content.into();
        self
    }

    /// Size reported alongside the content, when it should differ from its length.
    pub fn with_reported_size(self, size: u64) -> Self {
        *self.reported_size.lock() = Some(size);
        self
    }

    pub fn failing(self, message: &str) -> Self {
        *self.error.lock() = Some(message.to_string());
        self
    }

    /// Hold every fetch until [`release`](Self::release) or cancellation.
    pub fn held(self) -> Self {
        self.gate.closed.store(true, Ordering::SeqCst);
        self
    }

    /// Let `n` held fetches complete.
    pub fn release(&self, n: usize) {
        self.gate.permits.add_permits(n);
    }

    pub fn calls(&self) -> Vec<FetchCall> {
        self.calls.lock().clone()
    }

    pub fn fetch_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Fetches entered but not yet finished.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ArtifactFetcher for FakeFetcher {
    async fn fetch(
        &self,
        url: &Url,
        cache_key: &str,
        checksum: &ChecksumInfo,
        cancel: CancellationToken,
    ) -> Result<(ByteStream, u64), BoxError> {
        self.calls.lock().push(FetchCall {
            url: url.clone(),
            cache_key: cache_key.to_string(),
            checksum: checksum.clone(),
        });
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let passed = self.gate.pass(&cancel).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        passed?;

        let error = self.error.lock().clone();
        if let Some(message) = error {
            return Err(message.into());
        }
        let content = self.content.lock().clone();
        let size = self.reported_size.lock().unwrap_or(content.len() as u64);
        Ok((Box::new(Cursor::new(content)), size))
    }
}

/// Arguments of one `upload` call, with the file content read at call time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadCall {
    pub url: Url,
    pub content: Vec<u8>,
}

/// Accepts uploads into memory.
#[derive(Debug, Default)]
pub struct FakeUploader {
    error: Mutex<Option<String>>,
    gate: Gate,
    calls: Mutex<Vec<UploadCall>>,
    in_flight: AtomicUsize,
}

impl FakeUploader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(self, message: &str) -> Self {
        *self.error.lock() = Some(message.to_string());
        self
    }

    /// Hold every upload until [`release`](Self::release) or cancellation.
    pub fn held(self) -> Self {
        self.gate.closed.store(true, Ordering::SeqCst);
        self
    }

    pub fn release(&self, n: usize) {
        self.gate.permits.add_permits(n);
    }

    pub fn calls(&self) -> Vec<UploadCall> {
        self.calls.lock().clone()
    }

    pub fn upload_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Uploader for FakeUploader {
    async fn upload(
        &self,
        file: &Path,
        to: &Url,
        cancel: CancellationToken,
    ) -> Result<u64, BoxError> {
        let content = tokio::fs::read(file).await?;
        self.calls.lock().push(UploadCall {
            url: to.clone(),
            content: content.clone(),
        });
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let passed = self.gate.pass(&cancel).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        passed?;

        let error = self.error.lock().clone();
        if let Some(message) = error {
            return Err(message.into());
        }
        Ok(content.len() as u64)
    }
}
