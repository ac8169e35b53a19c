//! docfeed service host.
//!
//! Wires configuration, tracing and the NDJSON pipeline around the
//! [`docfeed_delivery`] engine.

pub mod config;
pub mod pipeline;
pub mod telemetry;

pub use config::Config;
pub use pipeline::{Pipeline, PipelineStats};
pub use telemetry::{init_tracing, LogFormat};
