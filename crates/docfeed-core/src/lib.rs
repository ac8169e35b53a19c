//! Core types shared by the docfeed delivery engine and its hosts.
//!
//! Holds the event model handed over by the ingestion pipeline, the clock
//! abstraction used for backoff and circuit timing, and the contract every
//! dead-letter sink implements. The delivery engine and the test utilities
//! both build on these so that neither depends on the other.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod models;
pub mod sink;
pub mod time;

pub use models::{Event, EventError, FieldRef};
pub use sink::{DeadLetterError, DeadLetterSink};
pub use time::{Clock, RealClock, TestClock};
