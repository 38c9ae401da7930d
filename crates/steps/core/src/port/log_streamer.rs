//!
//! # Log Streamer Port
//!
//! Sink for user-facing output (progress lines, exit status, health-check
//! messages). Operator diagnostics go through `tracing` instead.
//!

use parking_lot::Mutex;
use std::io::{self, Write};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, ReadBuf};
use tracing::info;

/// Destination for the stdout/stderr text a step emits for users.
pub trait LogStreamer: Send + Sync {
    /// Name of the source the output is attributed to.
    fn source_name(&self) -> &str;

    fn stdout(&self) -> Box<dyn Write + Send>;

    fn stderr(&self) -> Box<dyn Write + Send>;

    fn flush(&self);
}

/// Write a line of text to a streamer's stdout, ignoring sink failures.
pub fn emit_stdout(streamer: &dyn LogStreamer, text: &str) {
    let _ = streamer.stdout().write_all(text.as_bytes());
}

/// Write a line of text to a streamer's stderr, ignoring sink failures.
pub fn emit_stderr(streamer: &dyn LogStreamer, text: &str) {
    let _ = streamer.stderr().write_all(text.as_bytes());
}

/// Growable in-memory byte buffer shared between writers and one reader.
///
/// Reading drains what has been written so far; an empty buffer reads as
/// end of stream.
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl SharedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the current contents.
    pub fn contents(&self) -> Vec<u8> {
        self.inner.lock().clone()
    }

    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(&self.inner.lock()).into_owned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub fn clear(&self) {
        self.inner.lock().clear();
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl AsyncRead for SharedBuffer {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let mut inner = self.inner.lock();
        let n = inner.len().min(buf.remaining());
        buf.put_slice(&inner[..n]);
        inner.drain(..n);
        Poll::Ready(Ok(()))
    }
}

/// Captures stdout into a [`SharedBuffer`] and discards stderr.
///
/// Used for health-check probes whose output replaces their error through
/// an output wrapper.
#[derive(Debug, Clone)]
pub struct BufferStreamer {
    source_name: String,
    buffer: SharedBuffer,
}

impl BufferStreamer {
    pub fn new(buffer: SharedBuffer) -> Self {
        Self {
            source_name: "HEALTH".to_string(),
            buffer,
        }
    }

    pub fn with_source_name(mut self, name: impl Into<String>) -> Self {
        self.source_name = name.into();
        self
    }

    pub fn buffer(&self) -> &SharedBuffer {
        &self.buffer
    }
}

impl LogStreamer for BufferStreamer {
    fn source_name(&self) -> &str {
        &self.source_name
    }

    fn stdout(&self) -> Box<dyn Write + Send> {
        Box::new(self.buffer.clone())
    }

    fn stderr(&self) -> Box<dyn Write + Send> {
        Box::new(io::sink())
    }

    fn flush(&self) {}
}

#[derive(Debug, Clone, Copy)]
enum StreamKind {
    Stdout,
    Stderr,
}

/// Forwards each complete line to `tracing`, tagged with the source name.
#[derive(Debug, Clone)]
pub struct TracingStreamer {
    source_name: String,
}

impl TracingStreamer {
    pub fn new(source_name: impl Into<String>) -> Self {
        Self {
            source_name: source_name.into(),
        }
    }
}

impl LogStreamer for TracingStreamer {
    fn source_name(&self) -> &str {
        &self.source_name
    }

    fn stdout(&self) -> Box<dyn Write + Send> {
        Box::new(TracingLineWriter::new(&self.source_name, StreamKind::Stdout))
    }

    fn stderr(&self) -> Box<dyn Write + Send> {
        Box::new(TracingLineWriter::new(&self.source_name, StreamKind::Stderr))
    }

    fn flush(&self) {}
}

struct TracingLineWriter {
    source: String,
    kind: StreamKind,
    pending: Vec<u8>,
}

impl TracingLineWriter {
    fn new(source: &str, kind: StreamKind) -> Self {
        Self {
            source: source.to_string(),
            kind,
            pending: Vec::new(),
        }
    }

    fn emit(&self, line: &[u8]) {
        let line = String::from_utf8_lossy(line);
        let line = line.trim_end_matches('\r');
        match self.kind {
            StreamKind::Stdout => info!(source = %self.source, stream = "stdout", "{}", line),
            StreamKind::Stderr => info!(source = %self.source, stream = "stderr", "{}", line),
        }
    }
}

impl Write for TracingLineWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.pending.extend_from_slice(buf);
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            self.emit(&line[..line.len() - 1]);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if !self.pending.is_empty() {
            let line = std::mem::take(&mut self.pending);
            self.emit(&line);
        }
        Ok(())
    }
}

impl Drop for TracingLineWriter {
    fn drop(&mut self) {
        let _ = Write::flush(self);
    }
}
