//! In-memory log capture for asserting on emitted events.

use std::{
    io,
    sync::{Arc, Mutex, PoisonError},
};

use tracing::subscriber::DefaultGuard;
use tracing_subscriber::{fmt::MakeWriter, util::SubscriberInitExt, EnvFilter};

/// Collects formatted `docfeed` log lines for the current thread.
///
/// Works with `#[tokio::test]`'s current-thread runtime, where every task the
/// test awaits runs on the thread that installed the capture.
#[derive(Debug, Clone, Default)]
pub struct LogCapture {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl LogCapture {
    /// Creates an empty capture.
    pub fn new() -> Self {
        Self::default()
    }

    /// Routes `docfeed*` events at every level into this capture until the
    /// guard is dropped.
    pub fn install(&self) -> DefaultGuard {
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::new("docfeed=trace"))
            .with_writer(self.clone())
            .with_ansi(false)
            .without_time()
            .finish()
            .set_default()
    }

    /// Every captured line.
    pub fn lines(&self) -> Vec<String> {
        let buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
        String::from_utf8_lossy(&buffer).lines().map(str::to_string).collect()
    }

    /// Lines at `level` (`"WARN"`, `"ERROR"`, ...) containing `message`.
    pub fn count(&self, level: &str, message: &str) -> usize {
        self.lines()
            .iter()
            .filter(|line| line.trim_start().starts_with(level) && line.contains(message))
            .count()
    }
}

/// Writer handed out per event.
#[derive(Debug)]
pub struct CaptureWriter {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl io::Write for CaptureWriter {
    fn write(&mut self, bytes: &[u8]) -> io::Result<usize> {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner).extend_from_slice(bytes);
        Ok(bytes.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogCapture {
    type Writer = CaptureWriter;

    fn make_writer(&'a self) -> Self::Writer {
        CaptureWriter { buffer: Arc::clone(&self.buffer) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn captures_levels_and_messages() {
        let logs = LogCapture::new();

        {
            let _guard = logs.install();
            tracing::warn!(target: "docfeed_delivery::retry", retry = 0, "backing off");
            tracing::error!(target: "docfeed_delivery::engine", "gave up");
            tracing::warn!(target: "hyper::proto", "not ours");
        }
        tracing::warn!(target: "docfeed_delivery::retry", "after guard dropped");

        assert_eq!(logs.count("WARN", "backing off"), 1);
        assert_eq!(logs.count("ERROR", "gave up"), 1);
        assert_eq!(logs.count("WARN", "not ours"), 0);
        assert_eq!(logs.count("WARN", "after guard dropped"), 0);
    }
}
