//! Test infrastructure for docfeed.
//!
//! A wiremock-backed document store, dead-letter sinks that record or fail,
//! log capture, and event fixtures. Only depends on `docfeed-core`, so every crate in the
//! workspace can use it from its tests.

#![allow(clippy::expect_used, clippy::panic)]

pub mod fixtures;
pub mod http;
pub mod logs;
pub mod sink;

use tracing_subscriber::EnvFilter;

pub use fixtures::{closed_port_url, event};
pub use http::{MockDocumentStore, ReceivedWrite};
pub use logs::LogCapture;
pub use sink::{FailingDeadLetterSink, RecordingDeadLetterSink};

/// Routes tracing output through the test writer.
///
/// Safe to call from every test; only the first call installs a subscriber.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,docfeed=debug")),
        )
        .with_test_writer()
        .try_init();
}
