//! Mock document store.

use std::time::Duration;

use serde_json::Value;
use wiremock::{
    matchers::{method, path_regex},
    Mock, MockServer, ResponseTemplate,
};

/// Only well-formed document write paths are answered; anything else gets
/// wiremock's default 404.
const DOCUMENT_PATH: &str = "^/document/v1/[^/]+/[^/]+/docid/[^/]+$";

/// A document write the store received.
#[derive(Debug, Clone)]
pub struct ReceivedWrite {
    /// Request path, percent-encoded as sent.
    pub path: String,
    /// `Content-Type` header, if any.
    pub content_type: Option<String>,
    /// Parsed JSON body.
    pub body: Value,
}

impl ReceivedWrite {
    /// Last path segment, i.e. the document id as sent.
    pub fn document_id(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or_default()
    }
}

/// wiremock server standing in for the document store.
pub struct MockDocumentStore {
    server: MockServer,
}

impl MockDocumentStore {
    /// Starts a store on a random port.
    pub async fn start() -> Self {
        Self { server: MockServer::start().await }
    }

    /// Base URL of the store.
    pub fn url(&self) -> String {
        self.server.uri()
    }

    /// Answers every write with `status`.
    ///
    /// Mounted after a sequence, this is the fallback once the sequence is
    /// used up.
    pub async fn respond_always(&self, status: u16, body: impl Into<String>) {
        Mock::given(method("POST"))
            .and(path_regex(DOCUMENT_PATH))
            .respond_with(ResponseTemplate::new(status).set_body_string(body.into()))
            .mount(&self.server)
            .await;
    }

    /// Answers every write with `status` after `delay`.
    pub async fn respond_slowly(&self, status: u16, delay: Duration) {
        Mock::given(method("POST"))
            .and(path_regex(DOCUMENT_PATH))
            .respond_with(ResponseTemplate::new(status).set_delay(delay))
            .mount(&self.server)
            .await;
    }

    /// Starts a sequence of one-shot responses.
    pub fn sequence(&self) -> ResponseSequence<'_> {
        ResponseSequence { server: &self.server, responses: Vec::new() }
    }

    /// All writes received so far, in arrival order.
    pub async fn received_writes(&self) -> Vec<ReceivedWrite> {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .into_iter()
            .map(|request| ReceivedWrite {
                path: request.url.path().to_string(),
                content_type: request
                    .headers
                    .get("content-type")
                    .and_then(|value| value.to_str().ok())
                    .map(str::to_string),
                body: serde_json::from_slice(&request.body).unwrap_or(Value::Null),
            })
            .collect()
    }

    /// Number of writes received so far.
    pub async fn write_count(&self) -> usize {
        self.server.received_requests().await.map_or(0, |requests| requests.len())
    }
}

/// Responses served once each, in order.
pub struct ResponseSequence<'a> {
    server: &'a MockServer,
    responses: Vec<(u16, String)>,
}

impl ResponseSequence<'_> {
    /// Adds a one-shot response.
    #[must_use]
    pub fn then(mut self, status: u16, body: impl Into<String>) -> Self {
        self.responses.push((status, body.into()));
        self
    }

    /// Mounts the sequence.
    pub async fn mount(self) {
        for (status, body) in self.responses {
            Mock::given(method("POST"))
                .and(path_regex(DOCUMENT_PATH))
                .respond_with(ResponseTemplate::new(status).set_body_string(body))
                .up_to_n_times(1)
                .mount(self.server)
                .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn post(url: &str, body: &'static str) -> u16 {
        reqwest::Client::new()
            .post(url)
            .header("content-type", "application/json")
            .body(body)
            .send()
            .await
            .unwrap()
            .status()
            .as_u16()
    }

    #[tokio::test]
    async fn sequence_then_fallback() {
        let store = MockDocumentStore::start().await;
        store.sequence().then(503, "busy").then(503, "busy").mount().await;
        store.respond_always(200, "{}").await;

        let url = format!("{}/document/v1/ns/dt/docid/doc-1", store.url());
        let mut statuses = Vec::new();
        for _ in 0..3 {
            statuses.push(post(&url, r#"{"fields":{}}"#).await);
        }

        assert_eq!(statuses, [503, 503, 200]);
        assert_eq!(store.write_count().await, 3);

        let writes = store.received_writes().await;
        assert_eq!(writes[0].document_id(), "doc-1");
        assert_eq!(writes[0].content_type.as_deref(), Some("application/json"));
        assert_eq!(writes[0].body, serde_json::json!({"fields": {}}));
    }

    #[tokio::test]
    async fn malformed_paths_not_answered() {
        let store = MockDocumentStore::start().await;
        store.respond_always(200, "{}").await;

        let status = post(&format!("{}/document/v1/ns/docid/x", store.url()), "{}").await;

        assert_eq!(status, 404);
    }
}
