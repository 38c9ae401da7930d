//! Capture `tracing` output for assertions.

use hodei_steps_core::SharedBuffer;
use tracing::subscriber::DefaultGuard;

/// Captured log lines. Keep the value alive for as long as logs should be
/// captured on the current thread.
pub struct LogCapture {
    buffer: SharedBuffer,
    _guard: DefaultGuard,
}

impl LogCapture {
    pub fn text(&self) -> String {
        self.buffer.to_string_lossy()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.text().contains(needle)
    }
}

/// Install a thread-local subscriber writing plain text into memory.
///
/// Only events emitted on the current thread are captured, so use it with
/// `#[tokio::test]`'s single-threaded runtime.
pub fn capture_logs() -> LogCapture {
    let buffer = SharedBuffer::new();
    let writer = buffer.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::TRACE)
        .finish();
    LogCapture {
        buffer,
        _guard: tracing::subscriber::set_default(subscriber),
    }
}
