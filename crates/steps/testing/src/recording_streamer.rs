//! [`LogStreamer`] that keeps everything written to it.

use hodei_steps_core::{LogStreamer, SharedBuffer};
use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug, Default)]
pub struct RecordingStreamer {
    source_name: String,
    stdout: SharedBuffer,
    stderr: SharedBuffer,
    flushes: AtomicUsize,
}

impl RecordingStreamer {
    pub fn new() -> Arc<Self> {
        Self::named("APP")
    }

    pub fn named(source_name: &str) -> Arc<Self> {
        Arc::new(Self {
            source_name: source_name.to_string(),
            ..Default::default()
        })
    }

    pub fn stdout_text(&self) -> String {
        self.stdout.to_string_lossy()
    }

    pub fn stderr_text(&self) -> String {
        self.stderr.to_string_lossy()
    }

    pub fn stderr_len(&self) -> usize {
        self.stderr.len()
    }

    pub fn flush_count(&self) -> usize {
        self.flushes.load(Ordering::SeqCst)
    }
}

impl LogStreamer for RecordingStreamer {
    fn source_name(&self) -> &str {
        &self.source_name
    }

    fn stdout(&self) -> Box<dyn Write + Send> {
        Box::new(self.stdout.clone())
    }

    fn stderr(&self) -> Box<dyn Write + Send> {
        Box::new(self.stderr.clone())
    }

    fn flush(&self) {
        self.flushes.fetch_add(1, Ordering::SeqCst);
    }
}
