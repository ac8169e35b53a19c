//! Dead-letter routing and the sinks shipped with the engine.
//!
//! The router is the only place the engine talks to a sink. It never fails:
//! a sink error is logged and dropped so that `deliver` always completes.

use std::{
    fmt,
    future::Future,
    path::{Path, PathBuf},
    pin::Pin,
    sync::Arc,
};

use chrono::{DateTime, Utc};
use docfeed_core::{DeadLetterError, DeadLetterSink, Event};
use serde::{Deserialize, Serialize};
use tokio::{fs::File, io::AsyncWriteExt, sync::Mutex};

/// Forwards undeliverable events to the injected sink.
#[derive(Clone)]
pub struct DeadLetterRouter {
    sink: Arc<dyn DeadLetterSink>,
}

impl DeadLetterRouter {
    /// Creates a router for `sink`.
    pub fn new(sink: Arc<dyn DeadLetterSink>) -> Self {
        Self { sink }
    }

    /// Hands `event` and `reason` to the sink, logging any sink failure.
    pub async fn route(&self, event: &Event, reason: &str) {
        if let Err(e) = self.sink.write(event, reason).await {
            tracing::error!(
                error = %e,
                reason,
                "failed to write event to dead-letter sink, event dropped"
            );
        }
    }
}

impl fmt::Debug for DeadLetterRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeadLetterRouter").field("sink", &self.sink).finish()
    }
}

/// One line of a [`JsonLinesDeadLetterSink`] file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterRecord {
    /// The undeliverable event, unchanged.
    pub event: Event,
    /// Why delivery gave up.
    pub reason: String,
    /// When the event was dead-lettered.
    pub failed_at: DateTime<Utc>,
}

/// Appends dead-letter records to a file, one JSON object per line.
#[derive(Debug)]
pub struct JsonLinesDeadLetterSink {
    path: PathBuf,
    file: Mutex<File>,
}

impl JsonLinesDeadLetterSink {
    /// Opens `path` for appending, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns [`DeadLetterError::Io`] if the file cannot be opened.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, DeadLetterError> {
        let path = path.as_ref().to_path_buf();
        let file = tokio::fs::OpenOptions::new().create(true).append(true).open(&path).await?;

        Ok(Self { path, file: Mutex::new(file) })
    }

    /// File the sink appends to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn append(&self, event: &Event, reason: &str) -> Result<(), DeadLetterError> {
        let record = DeadLetterRecord {
            event: event.clone(),
            reason: reason.to_string(),
            failed_at: Utc::now(),
        };
        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');

        // Whole lines only; concurrent writers must not interleave.
        let mut file = self.file.lock().await;
        file.write_all(&line).await?;
        file.flush().await?;

        tracing::debug!(path = %self.path.display(), "event written to dead-letter file");
        Ok(())
    }
}

impl DeadLetterSink for JsonLinesDeadLetterSink {
    fn write<'a>(
        &'a self,
        event: &'a Event,
        reason: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<(), DeadLetterError>> + Send + 'a>> {
        Box::pin(self.append(event, reason))
    }
}

/// Sink used when no dead-letter destination is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiscardDeadLetterSink;

impl DeadLetterSink for DiscardDeadLetterSink {
    fn write<'a>(
        &'a self,
        event: &'a Event,
        reason: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<(), DeadLetterError>> + Send + 'a>> {
        Box::pin(async move {
            tracing::warn!(
                reason,
                fields = event.len(),
                "no dead-letter destination configured, discarding event"
            );
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn event(id: &str) -> Event {
        Event::try_from(json!({"id": id, "text": "hello"})).unwrap()
    }

    #[tokio::test]
    async fn json_lines_sink_appends_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dead-letters.jsonl");
        let sink = JsonLinesDeadLetterSink::open(&path).await.unwrap();

        sink.write(&event("a"), "HTTP 400: bad").await.unwrap();
        sink.write(&event("b"), "HTTP 404: missing").await.unwrap();

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let records: Vec<DeadLetterRecord> =
            contents.lines().map(|line| serde_json::from_str(line).unwrap()).collect();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].event, event("a"));
        assert_eq!(records[0].reason, "HTTP 400: bad");
        assert_eq!(records[1].reason, "HTTP 404: missing");
    }

    #[tokio::test]
    async fn reopening_keeps_existing_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dlq.jsonl");

        JsonLinesDeadLetterSink::open(&path).await.unwrap().write(&event("a"), "r1").await.unwrap();
        JsonLinesDeadLetterSink::open(&path).await.unwrap().write(&event("b"), "r2").await.unwrap();

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(contents.lines().count(), 2);
    }

    #[tokio::test]
    async fn concurrent_writes_produce_whole_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dlq.jsonl");
        let sink = Arc::new(JsonLinesDeadLetterSink::open(&path).await.unwrap());

        let mut tasks = tokio::task::JoinSet::new();
        for i in 0..50 {
            let sink = Arc::clone(&sink);
            tasks.spawn(async move { sink.write(&event(&i.to_string()), "busy").await });
        }
        while let Some(result) = tasks.join_next().await {
            result.unwrap().unwrap();
        }

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        for line in contents.lines() {
            serde_json::from_str::<DeadLetterRecord>(line).unwrap();
        }
        assert_eq!(contents.lines().count(), 50);
    }

    #[tokio::test]
    async fn open_fails_for_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let result = JsonLinesDeadLetterSink::open(dir.path().join("missing/dlq.jsonl")).await;

        assert!(matches!(result, Err(DeadLetterError::Io(_))));
    }

    #[tokio::test]
    async fn discard_sink_accepts_everything() {
        assert!(DiscardDeadLetterSink.write(&event("a"), "gone").await.is_ok());
    }
}
