//! Document identity resolution.

use docfeed_core::{Event, FieldRef};
use serde_json::Value;
use uuid::Uuid;

/// Derives the document identifier for an event.
///
/// Uses the value of the configured identity field when it is present and
/// non-empty, otherwise a fresh random UUID v4. Never fails.
#[derive(Debug, Clone)]
pub struct IdentityResolver {
    field: FieldRef,
}

impl IdentityResolver {
    /// Creates a resolver reading the given field reference.
    pub fn new(field: &str) -> Self {
        Self { field: FieldRef::parse(field) }
    }

    /// The configured identity field.
    pub fn field(&self) -> &FieldRef {
        &self.field
    }

    /// Returns a non-empty identifier for `event`.
    pub fn resolve(&self, event: &Event) -> String {
        event
            .lookup(&self.field)
            .and_then(render_value)
            .unwrap_or_else(|| Uuid::new_v4().to_string())
    }
}

/// Renders a field value as path text.
///
/// Strings are taken verbatim and everything else uses its compact JSON
/// text. `null` and the empty string count as absent.
pub(crate) fn render_value(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}
