//! Error types for document delivery.
//!
//! Every failure the engine can observe is a [`DeliveryError`]. Errors carry
//! enough context to become the human-readable dead-letter reason, and know
//! whether they describe a transient condition worth retrying.

use std::fmt;

use thiserror::Error;

/// Result type alias for delivery operations.
pub type Result<T> = std::result::Result<T, DeliveryError>;

/// Failures observed while delivering a document.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// Event fields could not be encoded into the request body.
    #[error("failed to serialize event: {message}")]
    Serialization {
        /// Encoder error message
        message: String,
    },

    /// Connection or I/O failure before a response arrived.
    #[error("transport error: {message}")]
    Transport {
        /// Error message including its causes
        message: String,
    },

    /// Request exceeded the configured operation timeout.
    #[error("request timeout after {timeout_seconds}s")]
    Timeout {
        /// Configured timeout in seconds
        timeout_seconds: u64,
    },

    /// No connection could be established within the connect timeout.
    #[error("connect timeout after {timeout_seconds}s")]
    ConnectTimeout {
        /// Configured connect timeout in seconds
        timeout_seconds: u64,
    },

    /// A namespace, document type or identity cannot be sent as a single
    /// path segment.
    #[error("invalid {component} {value:?}: not usable as a URL path segment")]
    InvalidPathSegment {
        /// Which path component was rejected
        component: &'static str,
        /// The rejected value
        value: String,
    },

    /// Store answered with a status worth retrying (429, 500, 502, 503, 504).
    #[error("HTTP {status_code}: {body}")]
    RetryableStatus {
        /// HTTP status code
        status_code: u16,
        /// Response body, possibly truncated
        body: String,
    },

    /// Store answered with any other non-200 status.
    #[error("HTTP {status_code}: {body}")]
    PermanentStatus {
        /// HTTP status code
        status_code: u16,
        /// Response body, possibly truncated
        body: String,
    },

    /// Circuit breaker rejected the attempt without a network call.
    #[error("circuit breaker open, document store considered unavailable")]
    CircuitOpen,

    /// A retryable condition outlasted the retry ceiling.
    #[error("retries exhausted after {retries} retries: {last}")]
    RetriesExhausted {
        /// Number of retries performed
        retries: u32,
        /// Failure observed on the final attempt
        last: Box<DeliveryError>,
    },

    /// Engine or client settings are unusable.
    #[error("invalid delivery configuration: {message}")]
    Configuration {
        /// Configuration error message
        message: String,
    },
}

impl DeliveryError {
    /// Creates a serialization error.
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization { message: message.into() }
    }

    /// Creates a transport error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport { message: message.into() }
    }

    /// Creates a timeout error.
    pub fn timeout(timeout_seconds: u64) -> Self {
        Self::Timeout { timeout_seconds }
    }

    /// Creates a connect timeout error.
    pub fn connect_timeout(timeout_seconds: u64) -> Self {
        Self::ConnectTimeout { timeout_seconds }
    }

    /// Creates an invalid path segment error.
    pub fn invalid_path_segment(component: &'static str, value: impl Into<String>) -> Self {
        Self::InvalidPathSegment { component, value: value.into() }
    }

    /// Creates a retries exhausted error wrapping the last failure.
    pub fn retries_exhausted(retries: u32, last: Self) -> Self {
        Self::RetriesExhausted { retries, last: Box::new(last) }
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into() }
    }

    /// Classifies a non-200 response by status code.
    pub fn from_status(status_code: u16, body: impl Into<String>) -> Self {
        let body = body.into();
        if crate::retry::is_retryable_status(status_code) {
            Self::RetryableStatus { status_code, body }
        } else {
            Self::PermanentStatus { status_code, body }
        }
    }

    /// Whether the failure is transient and eligible for backoff-and-retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport { .. }
            | Self::Timeout { .. }
            | Self::ConnectTimeout { .. }
            | Self::RetryableStatus { .. }
            | Self::CircuitOpen => true,

            Self::Serialization { .. }
            | Self::InvalidPathSegment { .. }
            | Self::PermanentStatus { .. }
            | Self::RetriesExhausted { .. }
            | Self::Configuration { .. } => false,
        }
    }

    /// HTTP status of the response behind this error, if there was one.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::RetryableStatus { status_code, .. } | Self::PermanentStatus { status_code, .. } => {
                Some(*status_code)
            },
            Self::RetriesExhausted { last, .. } => last.status_code(),
            _ => None,
        }
    }
}

/// Coarse failure category for structured log fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Event could not be encoded.
    Serialization,
    /// Event resolves to an unusable document path.
    Path,
    /// Connection failures and timeouts.
    Transport,
    /// Retryable HTTP statuses.
    Server,
    /// Permanent HTTP statuses.
    Client,
    /// Circuit breaker rejection.
    Circuit,
    /// Retry ceiling reached.
    Exhausted,
    /// Configuration problems.
    Configuration,
}

impl From<&DeliveryError> for ErrorCategory {
    fn from(error: &DeliveryError) -> Self {
        match error {
            DeliveryError::Serialization { .. } => Self::Serialization,
            DeliveryError::InvalidPathSegment { .. } => Self::Path,
            DeliveryError::Transport { .. }
            | DeliveryError::Timeout { .. }
            | DeliveryError::ConnectTimeout { .. } => Self::Transport,
            DeliveryError::RetryableStatus { .. } => Self::Server,
            DeliveryError::PermanentStatus { .. } => Self::Client,
            DeliveryError::CircuitOpen => Self::Circuit,
            DeliveryError::RetriesExhausted { .. } => Self::Exhausted,
            DeliveryError::Configuration { .. } => Self::Configuration,
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Serialization => write!(f, "serialization"),
            Self::Path => write!(f, "path"),
            Self::Transport => write!(f, "transport"),
            Self::Server => write!(f, "server"),
            Self::Client => write!(f, "client"),
            Self::Circuit => write!(f, "circuit"),
            Self::Exhausted => write!(f, "exhausted"),
            Self::Configuration => write!(f, "configuration"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors_identified_correctly() {
        assert!(DeliveryError::transport("connection refused").is_retryable());
        assert!(DeliveryError::timeout(180).is_retryable());
        assert!(DeliveryError::connect_timeout(10).is_retryable());
        assert!(DeliveryError::from_status(503, "busy").is_retryable());
        assert!(DeliveryError::from_status(429, "slow down").is_retryable());
        assert!(DeliveryError::CircuitOpen.is_retryable());

        assert!(!DeliveryError::from_status(400, "bad request").is_retryable());
        assert!(!DeliveryError::from_status(404, "not found").is_retryable());
        assert!(!DeliveryError::serialization("bad value").is_retryable());
        assert!(!DeliveryError::invalid_path_segment("document id", "..").is_retryable());
        assert!(!DeliveryError::retries_exhausted(3, DeliveryError::transport("x")).is_retryable());
        assert!(!DeliveryError::configuration("bad url").is_retryable());
    }

    #[test]
    fn status_classification_follows_retryable_set() {
        for status in [429, 500, 502, 503, 504] {
            assert!(matches!(
                DeliveryError::from_status(status, ""),
                DeliveryError::RetryableStatus { .. }
            ));
        }
        for status in [201, 204, 301, 400, 401, 403, 404, 409, 501, 505] {
            assert!(matches!(
                DeliveryError::from_status(status, ""),
                DeliveryError::PermanentStatus { .. }
            ));
        }
    }

    #[test]
    fn exhausted_reason_reflects_last_failure() {
        let error = DeliveryError::retries_exhausted(
            60,
            DeliveryError::from_status(503, "service unavailable"),
        );

        assert_eq!(
            error.to_string(),
            "retries exhausted after 60 retries: HTTP 503: service unavailable"
        );
        assert_eq!(error.status_code(), Some(503));
    }

    #[test]
    fn timeouts_name_their_bound() {
        assert_eq!(DeliveryError::timeout(180).to_string(), "request timeout after 180s");
        assert_eq!(DeliveryError::connect_timeout(10).to_string(), "connect timeout after 10s");
    }

    #[test]
    fn invalid_path_segment_reason_quotes_value() {
        assert_eq!(
            DeliveryError::invalid_path_segment("document id", "..").to_string(),
            "invalid document id \"..\": not usable as a URL path segment"
        );
    }

    #[test]
    fn error_categories_mapped_correctly() {
        assert_eq!(ErrorCategory::from(&DeliveryError::transport("x")), ErrorCategory::Transport);
        assert_eq!(ErrorCategory::from(&DeliveryError::from_status(502, "")), ErrorCategory::Server);
        assert_eq!(ErrorCategory::from(&DeliveryError::from_status(400, "")), ErrorCategory::Client);
        assert_eq!(ErrorCategory::from(&DeliveryError::CircuitOpen).to_string(), "circuit");
        assert_eq!(
            ErrorCategory::from(&DeliveryError::connect_timeout(10)),
            ErrorCategory::Transport
        );
        assert_eq!(
            ErrorCategory::from(&DeliveryError::invalid_path_segment("namespace", ".")),
            ErrorCategory::Path
        );
    }
}
