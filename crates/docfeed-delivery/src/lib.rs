//! Document delivery engine.
//!
//! Takes events from an ingestion pipeline and writes each one to a remote
//! document store over HTTP, guaranteeing that every event is either
//! acknowledged by the store or handed to a dead-letter sink.
//!
//! # Architecture
//!
//! 1. **Identity** - the configured identity field, or a fresh UUID v4
//! 2. **Request** - `POST /document/v1/{namespace}/{document-type}/docid/{id}`
//!    with body `{"fields": ...}`, built once and replayed on every attempt
//! 3. **Retry** - transport errors and 429/500/502/503/504 back off for
//!    `2^(attempt+1)` units up to the retry ceiling; 200 succeeds; anything
//!    else is permanent
//! 4. **Dead letter** - permanent and exhausted failures go to the injected
//!    sink together with a human-readable reason
//!
//! Backoff sleeps are async and go through an injected [`docfeed_core::Clock`],
//! so a retrying event parks its own task and nothing else.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use docfeed_core::Event;
//! use docfeed_delivery::{
//!     dead_letter::DiscardDeadLetterSink, DeliveryConfig, DeliveryEngine, DeliveryError,
//! };
//! use reqwest::Url;
//!
//! # async fn example() -> Result<(), DeliveryError> {
//! let base_url = Url::parse("http://localhost:8080").expect("valid url");
//! let config = DeliveryConfig::new(base_url, "news", "article");
//! let engine = DeliveryEngine::new(config, Arc::new(DiscardDeadLetterSink))?;
//!
//! let event = Event::from_json(r#"{"id": "doc-1", "text": "hello"}"#).expect("valid event");
//! let disposition = engine.deliver(&event).await;
//! println!("{disposition:?}");
//! # Ok(())
//! # }
//! ```

pub mod circuit;
pub mod client;
pub mod dead_letter;
pub mod engine;
pub mod error;
pub mod identity;
pub mod request;
pub mod retry;

pub use engine::{DeliveryConfig, DeliveryEngine, Disposition};
pub use error::{DeliveryError, Result};
pub use reqwest::Url;

/// Default document store root.
pub const DEFAULT_BASE_URL: &str = "http://localhost:8080";

/// Default field holding the document identity.
pub const DEFAULT_IDENTITY_FIELD: &str = "id";

/// Default number of retries after the first attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 60;

/// Default end-to-end request timeout in seconds.
pub const DEFAULT_OPERATION_TIMEOUT_SECONDS: u64 = 180;

/// Default connection timeout in seconds.
pub const DEFAULT_CONNECT_TIMEOUT_SECONDS: u64 = 10;

/// Default idle connections kept per host.
pub const DEFAULT_MAX_CONNECTIONS: usize = 1;
