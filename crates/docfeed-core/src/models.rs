//! Event model and field references.
//!
//! An [`Event`] is an insertion-ordered mapping from field name to JSON value.
//! The delivery engine treats it as opaque apart from a handful of fields it
//! looks up through a [`FieldRef`] (document identity, dynamic namespace and
//! document type).

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Errors raised when turning raw input into an [`Event`].
#[derive(Debug, Error)]
pub enum EventError {
    /// Input was not valid JSON.
    #[error("invalid event JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Input was valid JSON but not an object.
    #[error("event must be a JSON object, got {kind}")]
    NotAnObject {
        /// JSON type that was found instead
        kind: &'static str,
    },
}

/// A structured record produced by the ingestion pipeline.
///
/// Field order is preserved exactly as received, and serializing an event
/// yields the same mapping back.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Event {
    fields: Map<String, Value>,
}

impl Event {
    /// Creates an event with no fields.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps an existing field mapping.
    pub fn from_mapping(fields: Map<String, Value>) -> Self {
        Self { fields }
    }

    /// Parses a single JSON object into an event.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::Json`] for malformed input and
    /// [`EventError::NotAnObject`] when the top-level value is not an object.
    pub fn from_json(input: &str) -> Result<Self, EventError> {
        let value: Value = serde_json::from_str(input)?;
        Self::try_from(value)
    }

    /// Parses a single JSON object from raw bytes.
    ///
    /// Input that is not UTF-8 is reported as [`EventError::Json`].
    ///
    /// # Errors
    ///
    /// Same as [`Event::from_json`].
    pub fn from_slice(input: &[u8]) -> Result<Self, EventError> {
        let value: Value = serde_json::from_slice(input)?;
        Self::try_from(value)
    }

    /// Returns the top-level field with the given name.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Resolves a possibly nested field reference.
    pub fn lookup(&self, field: &FieldRef) -> Option<&Value> {
        let (first, rest) = field.segments.split_first()?;
        rest.iter().try_fold(self.fields.get(first)?, |value, segment| value.get(segment))
    }

    /// Inserts or replaces a top-level field, returning the previous value.
    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.fields.insert(field.into(), value.into())
    }

    /// Returns the ordered field/value pairs of this event.
    pub fn as_mapping(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Number of top-level fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the event has no fields at all.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl From<Map<String, Value>> for Event {
    fn from(fields: Map<String, Value>) -> Self {
        Self::from_mapping(fields)
    }
}

impl TryFrom<Value> for Event {
    type Error = EventError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(fields) => Ok(Self { fields }),
            Value::Null => Err(EventError::NotAnObject { kind: "null" }),
            Value::Bool(_) => Err(EventError::NotAnObject { kind: "boolean" }),
            Value::Number(_) => Err(EventError::NotAnObject { kind: "number" }),
            Value::String(_) => Err(EventError::NotAnObject { kind: "string" }),
            Value::Array(_) => Err(EventError::NotAnObject { kind: "array" }),
        }
    }
}

/// Reference to an event field.
///
/// Accepts a bare name (`id`), a bracketed name (`[id]`), or a bracketed path
/// into nested objects (`[meta][id]`). Anything that is not fully bracketed is
/// taken literally as a single top-level name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldRef {
    raw: String,
    segments: Vec<String>,
}

impl FieldRef {
    /// Parses a field reference.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        let segments = match raw.strip_prefix('[').and_then(|inner| inner.strip_suffix(']')) {
            Some(inner) => inner.split("][").map(str::to_string).collect(),
            None => vec![raw.to_string()],
        };

        Self { raw: raw.to_string(), segments }
    }

    /// The reference exactly as written.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Path segments from the outermost object inwards.
    pub fn segments(&self) -> &[String] {
        &self.segments
    }
}

impl fmt::Display for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}
