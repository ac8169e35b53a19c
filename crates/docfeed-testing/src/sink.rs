//! Dead-letter sinks for assertions.

use std::{
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex, PoisonError,
    },
};

use docfeed_core::{DeadLetterError, DeadLetterSink, Event};

/// Keeps every dead-lettered event and reason in memory.
#[derive(Debug, Default)]
pub struct RecordingDeadLetterSink {
    records: Mutex<Vec<(Event, String)>>,
}

impl RecordingDeadLetterSink {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every `(event, reason)` written so far.
    pub fn records(&self) -> Vec<(Event, String)> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Reasons written so far.
    pub fn reasons(&self) -> Vec<String> {
        self.records().into_iter().map(|(_, reason)| reason).collect()
    }

    /// Number of writes.
    pub fn len(&self) -> usize {
        self.records.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether nothing was dead-lettered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DeadLetterSink for RecordingDeadLetterSink {
    fn write<'a>(
        &'a self,
        event: &'a Event,
        reason: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<(), DeadLetterError>> + Send + 'a>> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((event.clone(), reason.to_string()));
        Box::pin(async { Ok(()) })
    }
}

/// Rejects every write, counting the attempts.
#[derive(Debug, Default)]
pub struct FailingDeadLetterSink {
    attempts: AtomicUsize,
}

impl FailingDeadLetterSink {
    /// Creates a sink that always fails.
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes attempted so far.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl DeadLetterSink for FailingDeadLetterSink {
    fn write<'a>(
        &'a self,
        _event: &'a Event,
        _reason: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<(), DeadLetterError>> + Send + 'a>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Box::pin(async { Err(DeadLetterError::Unavailable("sink offline".to_string())) })
    }
}
