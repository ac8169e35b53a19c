//! Write request construction.
//!
//! A [`WriteRequest`] is built once per event and replayed verbatim on every
//! attempt. Namespace and document type are either fixed strings or
//! `%{field}` references resolved against each event.

use std::fmt;

use bytes::Bytes;
use docfeed_core::{Event, FieldRef};
use reqwest::Url;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::{
    error::{DeliveryError, Result},
    identity::render_value,
};

/// Namespace or document type setting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetTemplate {
    /// Used as-is for every event.
    Static(String),
    /// Read from an event field (`%{name}`, `%{[name]}`, `%{[a][b]}`).
    Field(FieldRef),
}

impl TargetTemplate {
    /// Parses a configured namespace or document type.
    ///
    /// Only a value that is entirely `%{...}` is dynamic. Anything else,
    /// including text with an embedded reference, is static.
    pub fn parse(raw: &str) -> Self {
        match raw.strip_prefix("%{").and_then(|rest| rest.strip_suffix('}')) {
            Some(inner) if !inner.trim().is_empty() => Self::Field(FieldRef::parse(inner)),
            _ => Self::Static(raw.to_string()),
        }
    }

    /// Whether this template is resolved per event.
    pub fn is_dynamic(&self) -> bool {
        matches!(self, Self::Field(_))
    }

    /// Resolves the target for `event`.
    ///
    /// A missing, null, or empty field falls back to the field name.
    pub fn resolve(&self, event: &Event) -> String {
        match self {
            Self::Static(value) => value.clone(),
            Self::Field(field) => {
                event.lookup(field).and_then(render_value).unwrap_or_else(|| fallback_name(field))
            },
        }
    }
}

impl fmt::Display for TargetTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static(value) => f.write_str(value),
            Self::Field(field) => write!(f, "%{{{field}}}"),
        }
    }
}

fn fallback_name(field: &FieldRef) -> String {
    match field.segments() {
        [single] => single.clone(),
        _ => field.as_str().to_string(),
    }
}

/// A fully resolved document write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRequest {
    namespace: String,
    document_type: String,
    document_id: String,
    body: Bytes,
}

impl WriteRequest {
    /// Target namespace.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Target document type.
    pub fn document_type(&self) -> &str {
        &self.document_type
    }

    /// Document identifier.
    pub fn document_id(&self) -> &str {
        &self.document_id
    }

    /// Serialized `{"fields": ...}` body.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Logical target path, unencoded.
    pub fn path(&self) -> String {
        format!(
            "/document/v1/{}/{}/docid/{}",
            self.namespace, self.document_type, self.document_id
        )
    }

    /// Absolute URL under `base`, with each component encoded as one path
    /// segment.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::Configuration`] if `base` cannot carry a path.
    pub fn url(&self, base: &Url) -> Result<Url> {
        let mut url = base.clone();
        url.path_segments_mut()
            .map_err(|()| {
                DeliveryError::configuration(format!("base URL {base} cannot be a base"))
            })?
            .pop_if_empty()
            .extend([
                "document",
                "v1",
                self.namespace.as_str(),
                self.document_type.as_str(),
                "docid",
                self.document_id.as_str(),
            ]);
        Ok(url)
    }
}

#[derive(Serialize)]
struct DocumentBody<'a> {
    fields: &'a Map<String, Value>,
}

/// Turns events into [`WriteRequest`]s.
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    namespace: TargetTemplate,
    document_type: TargetTemplate,
}

impl RequestBuilder {
    /// Creates a builder from configured namespace and document type.
    pub fn new(namespace: &str, document_type: &str) -> Self {
        Self {
            namespace: TargetTemplate::parse(namespace),
            document_type: TargetTemplate::parse(document_type),
        }
    }

    /// Namespace template.
    pub fn namespace(&self) -> &TargetTemplate {
        &self.namespace
    }

    /// Document type template.
    pub fn document_type(&self) -> &TargetTemplate {
        &self.document_type
    }

    /// Builds the request for `event` under `document_id`.
    ///
    /// # Errors
    ///
    /// - [`DeliveryError::InvalidPathSegment`] if a resolved component is
    ///   `.` or `..`, which URL normalization would remove from the path
    /// - [`DeliveryError::Serialization`] if the event fields cannot be
    ///   encoded
    pub fn build(&self, event: &Event, document_id: String) -> Result<WriteRequest> {
        let namespace = self.namespace.resolve(event);
        let document_type = self.document_type.resolve(event);
        check_segment("namespace", &namespace)?;
        check_segment("document type", &document_type)?;
        check_segment("document id", &document_id)?;

        let body = serde_json::to_vec(&DocumentBody { fields: event.as_mapping() })
            .map_err(|e| DeliveryError::serialization(e.to_string()))?;

        Ok(WriteRequest { namespace, document_type, document_id, body: Bytes::from(body) })
    }
}

/// Dot segments cannot be percent-encoded past URL normalization, so they are
/// refused before a request exists.
fn check_segment(component: &'static str, value: &str) -> Result<()> {
    if matches!(value, "." | "..") {
        return Err(DeliveryError::invalid_path_segment(component, value));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn event(value: Value) -> Event {
        Event::try_from(value).unwrap()
    }

    #[test]
    fn builds_document_path_and_body() {
        let builder = RequestBuilder::new("news", "article");
        let event = event(json!({"id": "doc-1", "text": "hello", "n": 3, "tags": ["a"]}));

        let request = builder.build(&event, "doc-1".to_string()).unwrap();

        assert_eq!(request.path(), "/document/v1/news/article/docid/doc-1");
        let body: Value = serde_json::from_slice(request.body()).unwrap();
        assert_eq!(body, json!({"fields": {"id": "doc-1", "text": "hello", "n": 3, "tags": ["a"]}}));
    }

    #[test]
    fn body_preserves_field_order() {
        let builder = RequestBuilder::new("ns", "dt");
        let event = Event::from_json(r#"{"z": 1, "a": 2}"#).unwrap();

        let request = builder.build(&event, "x".to_string()).unwrap();

        assert_eq!(request.body().as_ref(), br#"{"fields":{"z":1,"a":2}}"#);
    }

    #[test]
    fn template_parsing() {
        assert_eq!(TargetTemplate::parse("news"), TargetTemplate::Static("news".into()));
        assert_eq!(TargetTemplate::parse("%{ns}"), TargetTemplate::Field(FieldRef::parse("ns")));
        assert_eq!(TargetTemplate::parse("%{[ns]}"), TargetTemplate::Field(FieldRef::parse("ns")));
        assert!(TargetTemplate::parse("%{[a][b]}").is_dynamic());
        assert!(!TargetTemplate::parse("prefix-%{ns}").is_dynamic());
        assert!(!TargetTemplate::parse("%{}").is_dynamic());
    }

    #[test]
    fn dynamic_targets_resolve_with_fallback() {
        let builder = RequestBuilder::new("%{[tenant]}", "%{kind}");

        let request = builder.build(&event(json!({"tenant": "acme", "kind": "log"})), "1".into());
        assert_eq!(request.unwrap().path(), "/document/v1/acme/log/docid/1");

        let request = builder.build(&event(json!({"kind": ""})), "1".into());
        assert_eq!(request.unwrap().path(), "/document/v1/tenant/kind/docid/1");
    }

    #[test]
    fn url_encodes_each_component_as_one_segment() {
        let base = Url::parse("http://localhost:8080").unwrap();
        let builder = RequestBuilder::new("ns", "dt");
        let event = event(json!({}));

        let request = builder.build(&event, "doc-1".into()).unwrap();
        assert_eq!(request.url(&base).unwrap().path(), "/document/v1/ns/dt/docid/doc-1");

        let request = builder.build(&event, "a/b c?d".into()).unwrap();
        assert_eq!(request.url(&base).unwrap().path(), "/document/v1/ns/dt/docid/a%2Fb%20c%3Fd");
    }

    #[test]
    fn dot_segments_rejected_for_every_component() {
        let base = Url::parse("http://localhost:8080").unwrap();
        let plain = RequestBuilder::new("ns", "dt");
        let dynamic = RequestBuilder::new("%{tenant}", "%{kind}");

        for dots in [".", ".."] {
            let error = plain.build(&event(json!({})), dots.into()).unwrap_err();
            assert_eq!(error, DeliveryError::invalid_path_segment("document id", dots));

            let error = dynamic.build(&event(json!({"tenant": dots, "kind": "k"})), "1".into());
            assert_eq!(error.unwrap_err(), DeliveryError::invalid_path_segment("namespace", dots));

            let error = dynamic.build(&event(json!({"tenant": "t", "kind": dots})), "1".into());
            assert_eq!(
                error.unwrap_err(),
                DeliveryError::invalid_path_segment("document type", dots)
            );
        }

        let request = plain.build(&event(json!({})), "...".into()).unwrap();
        assert_eq!(request.url(&base).unwrap().path(), "/document/v1/ns/dt/docid/...");
        let request = plain.build(&event(json!({})), ".hidden".into()).unwrap();
        assert_eq!(request.url(&base).unwrap().path(), "/document/v1/ns/dt/docid/.hidden");
    }

    #[test]
    fn url_keeps_base_path_prefix() {
        let base = Url::parse("https://store.example.com/proxy/").unwrap();
        let request = RequestBuilder::new("ns", "dt").build(&event(json!({})), "1".into()).unwrap();

        assert_eq!(
            request.url(&base).unwrap().as_str(),
            "https://store.example.com/proxy/document/v1/ns/dt/docid/1"
        );
    }

    #[test]
    fn base_without_path_support_rejected() {
        let base = Url::parse("mailto:ops@example.com").unwrap();
        let request = RequestBuilder::new("ns", "dt").build(&event(json!({})), "1".into()).unwrap();

        assert!(matches!(request.url(&base), Err(DeliveryError::Configuration { .. })));
    }
}
