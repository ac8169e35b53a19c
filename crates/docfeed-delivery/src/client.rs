//! HTTP client for document writes.
//!
//! Executes exactly one `POST` per call and classifies the result. Retrying
//! is the retry controller's job; this client never loops.

use std::{
    error::Error as StdError,
    path::PathBuf,
    time::{Duration, Instant},
};

use reqwest::{header::CONTENT_TYPE, Response, Url};
use tracing::{info_span, Instrument};

use crate::{
    error::{DeliveryError, Result},
    request::WriteRequest,
};

/// Largest response body kept for failure reasons, suffix included.
const MAX_BODY_SIZE: usize = 1024;

const TRUNCATION_SUFFIX: &str = "... (truncated)";

/// PEM files used to authenticate to the document store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsIdentity {
    /// Client certificate chain.
    pub cert_path: PathBuf,
    /// Private key for the certificate.
    pub key_path: PathBuf,
}

/// Configuration for the document store client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Store root; write paths are appended to it.
    pub base_url: Url,
    /// End-to-end bound on a single request.
    pub operation_timeout: Duration,
    /// Bound on establishing a connection.
    pub connect_timeout: Duration,
    /// Idle pooled connections kept per host.
    pub max_connections: usize,
    /// User agent string for requests.
    pub user_agent: String,
    /// Optional client certificate for mutual TLS.
    pub tls_identity: Option<TlsIdentity>,
}

impl ClientConfig {
    /// Creates a configuration with default timeouts for `base_url`.
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            operation_timeout: Duration::from_secs(crate::DEFAULT_OPERATION_TIMEOUT_SECONDS),
            connect_timeout: Duration::from_secs(crate::DEFAULT_CONNECT_TIMEOUT_SECONDS),
            max_connections: crate::DEFAULT_MAX_CONNECTIONS,
            user_agent: format!("docfeed/{}", env!("CARGO_PKG_VERSION")),
            tls_identity: None,
        }
    }
}

/// Response to a write attempt.
#[derive(Debug, Clone)]
pub struct DeliveryResponse {
    /// HTTP status code.
    pub status_code: u16,
    /// Response body, truncated to 1 KiB.
    pub body: String,
    /// Total duration of the request.
    pub duration: Duration,
}

/// Classified result of a single write attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Store answered 200.
    Success,
    /// Transient failure; worth another attempt.
    RetryableFailure(DeliveryError),
    /// Failure that no retry will fix.
    PermanentFailure(DeliveryError),
}

impl DeliveryOutcome {
    fn from_error(error: DeliveryError) -> Self {
        if error.is_retryable() {
            Self::RetryableFailure(error)
        } else {
            Self::PermanentFailure(error)
        }
    }
}

/// One-shot HTTP client for the document store.
///
/// Cheap to clone; clones share the connection pool.
#[derive(Debug, Clone)]
pub struct DeliveryClient {
    client: reqwest::Client,
    config: ClientConfig,
}

impl DeliveryClient {
    /// Creates a client with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::Configuration` if the TLS identity cannot be
    /// loaded or the HTTP client cannot be built.
    pub fn new(config: ClientConfig) -> Result<Self> {
        if config.max_connections == 0 {
            return Err(DeliveryError::configuration("max_connections must be at least 1"));
        }
        if config.base_url.cannot_be_a_base() {
            return Err(DeliveryError::configuration(format!(
                "base URL {} cannot be a base",
                config.base_url
            )));
        }

        let mut builder = reqwest::Client::builder()
            .timeout(config.operation_timeout)
            .connect_timeout(config.connect_timeout)
            .pool_max_idle_per_host(config.max_connections)
            .user_agent(&config.user_agent);

        match &config.tls_identity {
            Some(tls) => builder = builder.identity(load_identity(tls)?),
            None => tracing::warn!(
                base_url = %config.base_url,
                "no client certificate configured, connection to the document store is not client-authenticated"
            ),
        }

        let client = builder.build().map_err(|e| {
            DeliveryError::configuration(format!("failed to build HTTP client: {e}"))
        })?;

        Ok(Self { client, config })
    }

    /// Client configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Sends `request` once and returns the raw response.
    ///
    /// Any HTTP status is returned as `Ok`; only failures before a response
    /// arrived are errors.
    ///
    /// # Errors
    ///
    /// - `Timeout` when the operation timeout elapsed
    /// - `ConnectTimeout` when no connection was established in time
    /// - `Transport` for connection and I/O failures
    /// - `Configuration` when the target URL cannot be formed
    pub async fn execute(&self, request: &WriteRequest, attempt: u32) -> Result<DeliveryResponse> {
        let url = request.url(&self.config.base_url)?;

        let span = info_span!(
            "document_write",
            namespace = request.namespace(),
            document_type = request.document_type(),
            document_id = request.document_id(),
            attempt
        );

        async move {
            let start_time = Instant::now();

            let response = self
                .client
                .post(url)
                .header(CONTENT_TYPE, "application/json")
                .body(request.body().clone())
                .send()
                .await;

            let response = match response {
                Ok(response) => response,
                Err(e) => {
                    let duration = start_time.elapsed();
                    tracing::debug!(duration_ms = duration.as_millis(), error = %e, "request failed");

                    return Err(self.classify_send_error(&e));
                },
            };

            let delivery_response = read_response(response, start_time).await;

            tracing::debug!(
                status = delivery_response.status_code,
                duration_ms = delivery_response.duration.as_millis(),
                "received response"
            );

            Ok(delivery_response)
        }
        .instrument(span)
        .await
    }

    fn classify_send_error(&self, error: &reqwest::Error) -> DeliveryError {
        match (error.is_timeout(), error.is_connect()) {
            (true, true) => DeliveryError::connect_timeout(self.config.connect_timeout.as_secs()),
            (true, false) => DeliveryError::timeout(self.config.operation_timeout.as_secs()),
            (false, _) => DeliveryError::transport(error_chain(error)),
        }
    }

    /// Sends `request` once and classifies the result.
    pub async fn send(&self, request: &WriteRequest, attempt: u32) -> DeliveryOutcome {
        match self.execute(request, attempt).await {
            Ok(response) if response.status_code == 200 => DeliveryOutcome::Success,
            Ok(response) => {
                DeliveryOutcome::from_error(DeliveryError::from_status(response.status_code, response.body))
            },
            Err(error) => DeliveryOutcome::from_error(error),
        }
    }
}

async fn read_response(response: Response, start_time: Instant) -> DeliveryResponse {
    let status_code = response.status().as_u16();

    let body = match response.bytes().await {
        Ok(bytes) => truncate_body(&String::from_utf8_lossy(&bytes)),
        Err(e) => {
            tracing::warn!(error = %e, "failed to read response body");
            format!("[failed to read response body: {e}]")
        },
    };

    DeliveryResponse { status_code, body, duration: start_time.elapsed() }
}

fn load_identity(tls: &TlsIdentity) -> Result<reqwest::Identity> {
    let read = |path: &PathBuf| {
        std::fs::read(path).map_err(|e| {
            DeliveryError::configuration(format!("failed to read {}: {e}", path.display()))
        })
    };

    let mut pem = read(&tls.cert_path)?;
    pem.push(b'\n');
    pem.extend(read(&tls.key_path)?);

    reqwest::Identity::from_pem(&pem)
        .map_err(|e| DeliveryError::configuration(format!("invalid client certificate: {e}")))
}

/// Joins an error and all of its sources into one message.
fn error_chain(error: &dyn StdError) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

fn truncate_body(body: &str) -> String {
    if body.len() <= MAX_BODY_SIZE {
        return body.to_string();
    }

    let mut end = MAX_BODY_SIZE - TRUNCATION_SUFFIX.len();
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}{TRUNCATION_SUFFIX}", &body[..end])
}
