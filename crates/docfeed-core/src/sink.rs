//! Dead-letter sink contract.
//!
//! The delivery engine never stores undeliverable events itself. It hands
//! each one, together with a human-readable reason, to an injected
//! [`DeadLetterSink`]. Sinks are shared by every concurrent delivery, so they
//! must be `Send + Sync` and handle their own synchronization.

use std::{future::Future, pin::Pin};

use thiserror::Error;

use crate::models::Event;

/// Errors a dead-letter sink may report.
///
/// The engine only logs these; a failing sink never fails a delivery.
#[derive(Debug, Error)]
pub enum DeadLetterError {
    /// Writing to the underlying storage failed.
    #[error("dead-letter write failed: {0}")]
    Io(#[from] std::io::Error),

    /// The record could not be encoded.
    #[error("failed to encode dead-letter record: {0}")]
    Encode(#[from] serde_json::Error),

    /// The sink is not accepting records.
    #[error("dead-letter sink unavailable: {0}")]
    Unavailable(String),
}

/// Durable destination for events that could not be delivered.
pub trait DeadLetterSink: Send + Sync + std::fmt::Debug {
    /// Records an undeliverable event and the reason delivery gave up.
    fn write<'a>(
        &'a self,
        event: &'a Event,
        reason: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<(), DeadLetterError>> + Send + 'a>>;
}
