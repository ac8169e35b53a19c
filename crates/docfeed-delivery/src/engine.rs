//! Document delivery engine.
//!
//! Wires identity resolution, request building, the retry controller and
//! dead-letter routing behind one cloneable handle.
//!
//! ```text
//! ┌──────────────┐   ┌────────────────┐   ┌─────────────────┐
//! │   Identity   │──▶│ RequestBuilder │──▶│ RetryController │──▶ 200
//! │   Resolver   │   └────────────────┘   │ (DeliveryClient)│
//! └──────────────┘           │            └─────────────────┘
//!                            │ serialization        │ permanent / exhausted
//!                            ▼                      ▼
//!                      ┌─────────────────────────────────┐
//!                      │        DeadLetterRouter         │
//!                      └─────────────────────────────────┘
//! ```
//!
//! Every call to [`DeliveryEngine::deliver`] ends in exactly one of two
//! places: a 200 from the document store, or one write to the dead-letter
//! sink.

use std::sync::Arc;

use docfeed_core::{Clock, DeadLetterSink, Event, RealClock};
use reqwest::Url;
use tracing::{info_span, Instrument};

use crate::{
    circuit::{CircuitBreaker, CircuitConfig, CircuitState},
    client::{ClientConfig, DeliveryClient},
    dead_letter::DeadLetterRouter,
    error::{DeliveryError, ErrorCategory, Result},
    identity::IdentityResolver,
    request::RequestBuilder,
    retry::{RetryController, RetryPolicy, RetryResolution},
};

/// Configuration for the delivery engine.
///
/// Immutable once the engine is built.
#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    /// Target namespace, static or `%{field}`.
    pub namespace: String,

    /// Target document type, static or `%{field}`.
    pub document_type: String,

    /// Field holding the document identity.
    pub identity_field: String,

    /// HTTP client configuration.
    pub client_config: ClientConfig,

    /// Backoff policy for retryable failures.
    pub retry_policy: RetryPolicy,

    /// Circuit breaker timing; `None` disables the breaker.
    pub circuit_config: Option<CircuitConfig>,
}

impl DeliveryConfig {
    /// Creates a configuration with defaults for everything but the target.
    pub fn new(
        base_url: Url,
        namespace: impl Into<String>,
        document_type: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            document_type: document_type.into(),
            identity_field: crate::DEFAULT_IDENTITY_FIELD.to_string(),
            client_config: ClientConfig::new(base_url),
            retry_policy: RetryPolicy::default(),
            circuit_config: None,
        }
    }

    /// Checks settings the client does not check itself.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::Configuration` naming the offending setting.
    pub fn validate(&self) -> Result<()> {
        if self.namespace.trim().is_empty() {
            return Err(DeliveryError::configuration("namespace must not be empty"));
        }
        if self.document_type.trim().is_empty() {
            return Err(DeliveryError::configuration("document type must not be empty"));
        }
        if self.identity_field.trim().is_empty() {
            return Err(DeliveryError::configuration("identity field must not be empty"));
        }
        let targets = [("namespace", &self.namespace), ("document type", &self.document_type)];
        for (name, value) in targets {
            if matches!(value.as_str(), "." | "..") {
                return Err(DeliveryError::configuration(format!(
                    "{name} {value:?} is not usable as a URL path segment"
                )));
            }
        }
        if !(0.0..=1.0).contains(&self.retry_policy.jitter_factor) {
            return Err(DeliveryError::configuration(format!(
                "backoff jitter must be between 0.0 and 1.0, got {}",
                self.retry_policy.jitter_factor
            )));
        }
        if let Some(circuit) = &self.circuit_config {
            if circuit.doom_period < circuit.grace_period {
                return Err(DeliveryError::configuration(
                    "doom period must not be shorter than grace period",
                ));
            }
        }
        Ok(())
    }
}

/// How a delivery ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// The store acknowledged the write.
    Delivered {
        /// Attempts made, including the successful one
        attempts: u32,
    },
    /// The event went to the dead-letter sink.
    DeadLettered {
        /// Transport attempts made (0 if the request could not be built)
        attempts: u32,
        /// Reason handed to the sink
        reason: String,
    },
}

impl Disposition {
    /// Whether the store acknowledged the write.
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered { .. })
    }

    /// Attempts made for the event.
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Delivered { attempts } | Self::DeadLettered { attempts, .. } => *attempts,
        }
    }
}

#[derive(Debug)]
struct EngineInner {
    config: DeliveryConfig,
    identity: IdentityResolver,
    builder: RequestBuilder,
    controller: RetryController,
    router: DeadLetterRouter,
    circuit: Option<Arc<CircuitBreaker>>,
}

/// Delivers events to the document store.
///
/// Cheap to clone and safe to call from many tasks at once; clones share the
/// HTTP connection pool, the dead-letter sink and the circuit breaker.
#[derive(Debug, Clone)]
pub struct DeliveryEngine {
    inner: Arc<EngineInner>,
}

impl DeliveryEngine {
    /// Creates an engine that sleeps on tokio timers.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::Configuration` for invalid settings.
    pub fn new(config: DeliveryConfig, sink: Arc<dyn DeadLetterSink>) -> Result<Self> {
        Self::with_clock(config, sink, Arc::new(RealClock::new()))
    }

    /// Creates an engine driven by `clock`.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::Configuration` for invalid settings.
    pub fn with_clock(
        config: DeliveryConfig,
        sink: Arc<dyn DeadLetterSink>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;

        let client = DeliveryClient::new(config.client_config.clone())?;
        let mut controller =
            RetryController::new(client, config.retry_policy.clone(), Arc::clone(&clock));

        let circuit = config
            .circuit_config
            .clone()
            .map(|circuit_config| Arc::new(CircuitBreaker::new(circuit_config, clock)));
        if let Some(circuit) = &circuit {
            controller = controller.with_circuit_breaker(Arc::clone(circuit));
        }

        let identity = IdentityResolver::new(&config.identity_field);
        let builder = RequestBuilder::new(&config.namespace, &config.document_type);

        tracing::info!(
            base_url = %config.client_config.base_url,
            namespace = %builder.namespace(),
            document_type = %builder.document_type(),
            identity_field = %identity.field(),
            max_retries = config.retry_policy.max_retries,
            circuit_breaker = circuit.is_some(),
            "delivery engine configured"
        );

        Ok(Self {
            inner: Arc::new(EngineInner {
                config,
                identity,
                builder,
                controller,
                router: DeadLetterRouter::new(sink),
                circuit,
            }),
        })
    }

    /// Engine configuration.
    pub fn config(&self) -> &DeliveryConfig {
        &self.inner.config
    }

    /// Current circuit breaker state, if the breaker is enabled.
    pub async fn circuit_state(&self) -> Option<CircuitState> {
        match &self.inner.circuit {
            Some(circuit) => Some(circuit.state().await),
            None => None,
        }
    }

    /// Delivers `event`, retrying transient failures and dead-lettering
    /// everything else.
    ///
    /// Never fails and never returns before the event is resolved.
    pub async fn deliver(&self, event: &Event) -> Disposition {
        let document_id = self.inner.identity.resolve(event);
        let span = info_span!("deliver", document_id = %document_id);

        async move {
            let request = match self.inner.builder.build(event, document_id) {
                Ok(request) => request,
                Err(error) => return self.dead_letter(event, 0, &error).await,
            };

            tracing::trace!(path = %request.path(), "sending document");

            match self.inner.controller.run(&request).await {
                RetryResolution::Delivered { attempts } => {
                    tracing::debug!(attempts, path = %request.path(), "document delivered");
                    Disposition::Delivered { attempts }
                },
                RetryResolution::Failed { attempts, error } => {
                    self.dead_letter(event, attempts, &error).await
                },
            }
        }
        .instrument(span)
        .await
    }

    async fn dead_letter(&self, event: &Event, attempts: u32, error: &DeliveryError) -> Disposition {
        let reason = error.to_string();

        tracing::error!(
            attempts,
            category = %ErrorCategory::from(error),
            status = error.status_code(),
            reason = %reason,
            "delivery failed, writing event to dead-letter sink"
        );
        self.inner.router.route(event, &reason).await;

        Disposition::DeadLettered { attempts, reason }
    }
}
