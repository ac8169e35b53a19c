//! Configuration for the docfeed service.

use std::{path::PathBuf, time::Duration};

use anyhow::{Context, Result};
use docfeed_delivery::{
    circuit::CircuitConfig,
    client::{ClientConfig, TlsIdentity},
    retry::RetryPolicy,
    DeliveryConfig, Url,
};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::telemetry::LogFormat;

const CONFIG_FILE: &str = "docfeed.toml";

/// Environment variable naming an alternative configuration file.
pub const CONFIG_PATH_ENV: &str = "DOCFEED_CONFIG";

const ENV_PREFIX: &str = "DOCFEED_";

/// Complete service configuration.
///
/// Loaded in priority order:
/// 1. `DOCFEED_*` environment variables (`DOCFEED_MAX_RETRIES` sets
///    `max-retries`)
/// 2. `docfeed.toml`, or the file named by `DOCFEED_CONFIG`
/// 3. Built-in defaults
///
/// `namespace` and `document-type` have no default and must be set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    /// Document store root URL.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Target namespace, static or `%{field}`.
    #[serde(default)]
    pub namespace: String,
    /// Target document type, static or `%{field}`.
    #[serde(default)]
    pub document_type: String,
    /// Field holding the document identity.
    #[serde(default = "default_identity_field")]
    pub identity_field: String,

    // Retry
    /// Retries after the first attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Backoff time unit in milliseconds.
    #[serde(default = "default_backoff_unit_ms")]
    pub backoff_unit_ms: u64,
    /// Cap on a single backoff delay in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_backoff_ms: Option<u64>,
    /// Jitter fraction for backoff delays (0.0 to 1.0).
    #[serde(default)]
    pub backoff_jitter: f64,

    // Client
    /// Per-request timeout in seconds.
    #[serde(default = "default_operation_timeout")]
    pub operation_timeout: u64,
    /// Connection timeout in seconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,
    /// Idle connections kept per host.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Client certificate PEM for mutual TLS.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_cert: Option<PathBuf>,
    /// Private key PEM for mutual TLS.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_key: Option<PathBuf>,

    // Circuit breaker
    /// Enables the grace-period circuit breaker.
    #[serde(default)]
    pub circuit_breaker: bool,
    /// Failure streak in seconds before the breaker starts probing.
    #[serde(default = "default_grace_period")]
    pub grace_period: u64,
    /// Failure streak in seconds before the breaker rejects attempts.
    #[serde(default = "default_doom_period")]
    pub doom_period: u64,

    // Host
    /// JSON-lines file for undeliverable events. Unset discards them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dead_letter_path: Option<PathBuf>,
    /// Concurrent deliveries.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Log output format.
    #[serde(default)]
    pub log_format: LogFormat,
}

impl Config {
    /// Loads configuration from defaults, the config file, and environment
    /// overrides, then validates it.
    pub fn load() -> Result<Self> {
        Self::from_figment(Self::figment())
    }

    /// The layered provider stack behind [`Config::load`].
    pub fn figment() -> Figment {
        let file = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| CONFIG_FILE.to_string());

        Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(file))
            .merge(
                Env::prefixed(ENV_PREFIX)
                    .ignore(&["config"])
                    .map(|key| key.as_str().replace('_', "-").into()),
            )
    }

    /// Extracts and validates configuration from `figment`.
    pub fn from_figment(figment: Figment) -> Result<Self> {
        let config: Self = figment.extract().context("failed to load configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Converts to the engine configuration.
    pub fn to_delivery_config(&self) -> Result<DeliveryConfig> {
        Ok(DeliveryConfig {
            namespace: self.namespace.clone(),
            document_type: self.document_type.clone(),
            identity_field: self.identity_field.clone(),
            client_config: self.to_client_config()?,
            retry_policy: self.to_retry_policy(),
            circuit_config: self.to_circuit_config(),
        })
    }

    /// Converts to client configuration.
    pub fn to_client_config(&self) -> Result<ClientConfig> {
        let base_url = Url::parse(&self.base_url)
            .with_context(|| format!("invalid base-url {:?}", self.base_url))?;

        let tls_identity = match (&self.client_cert, &self.client_key) {
            (Some(cert_path), Some(key_path)) => {
                Some(TlsIdentity { cert_path: cert_path.clone(), key_path: key_path.clone() })
            },
            _ => None,
        };

        Ok(ClientConfig {
            operation_timeout: Duration::from_secs(self.operation_timeout),
            connect_timeout: Duration::from_secs(self.connect_timeout),
            max_connections: self.max_connections,
            tls_identity,
            ..ClientConfig::new(base_url)
        })
    }

    /// Converts to retry policy.
    pub fn to_retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            backoff_unit: Duration::from_millis(self.backoff_unit_ms),
            max_backoff: self.max_backoff_ms.map(Duration::from_millis),
            jitter_factor: self.backoff_jitter,
        }
    }

    /// Converts to circuit breaker configuration, `None` when disabled.
    pub fn to_circuit_config(&self) -> Option<CircuitConfig> {
        self.circuit_breaker.then(|| CircuitConfig {
            grace_period: Duration::from_secs(self.grace_period),
            doom_period: Duration::from_secs(self.doom_period),
        })
    }

    /// Validate configuration values.
    fn validate(&self) -> Result<()> {
        if self.namespace.trim().is_empty() {
            anyhow::bail!("namespace is required");
        }

        if self.document_type.trim().is_empty() {
            anyhow::bail!("document-type is required");
        }

        if self.identity_field.trim().is_empty() {
            anyhow::bail!("identity-field must not be empty");
        }

        let base_url = Url::parse(&self.base_url)
            .with_context(|| format!("invalid base-url {:?}", self.base_url))?;
        if !matches!(base_url.scheme(), "http" | "https") {
            anyhow::bail!("base-url must use http or https, got {}", base_url.scheme());
        }

        if self.backoff_unit_ms == 0 {
            anyhow::bail!("backoff-unit-ms must be greater than 0");
        }

        if !(0.0..=1.0).contains(&self.backoff_jitter) {
            anyhow::bail!("backoff-jitter must be between 0.0 and 1.0");
        }

        if self.operation_timeout == 0 {
            anyhow::bail!("operation-timeout must be greater than 0");
        }

        if self.max_connections == 0 {
            anyhow::bail!("max-connections must be greater than 0");
        }

        match (&self.client_cert, &self.client_key) {
            (Some(_), None) => anyhow::bail!("client-cert is set but client-key is missing"),
            (None, Some(_)) => anyhow::bail!("client-key is set but client-cert is missing"),
            _ => {},
        }

        if self.doom_period < self.grace_period {
            anyhow::bail!("doom-period must not be shorter than grace-period");
        }

        if self.workers == 0 {
            anyhow::bail!("workers must be greater than 0");
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            namespace: String::new(),
            document_type: String::new(),
            identity_field: default_identity_field(),
            max_retries: default_max_retries(),
            backoff_unit_ms: default_backoff_unit_ms(),
            max_backoff_ms: None,
            backoff_jitter: 0.0,
            operation_timeout: default_operation_timeout(),
            connect_timeout: default_connect_timeout(),
            max_connections: default_max_connections(),
            client_cert: None,
            client_key: None,
            circuit_breaker: false,
            grace_period: default_grace_period(),
            doom_period: default_doom_period(),
            dead_letter_path: None,
            workers: default_workers(),
            log_format: LogFormat::default(),
        }
    }
}

fn default_base_url() -> String {
    docfeed_delivery::DEFAULT_BASE_URL.to_string()
}

fn default_identity_field() -> String {
    docfeed_delivery::DEFAULT_IDENTITY_FIELD.to_string()
}

fn default_max_retries() -> u32 {
    docfeed_delivery::DEFAULT_MAX_RETRIES
}

fn default_backoff_unit_ms() -> u64 {
    1000
}

fn default_operation_timeout() -> u64 {
    docfeed_delivery::DEFAULT_OPERATION_TIMEOUT_SECONDS
}

fn default_connect_timeout() -> u64 {
    docfeed_delivery::DEFAULT_CONNECT_TIMEOUT_SECONDS
}

fn default_max_connections() -> usize {
    docfeed_delivery::DEFAULT_MAX_CONNECTIONS
}

fn default_grace_period() -> u64 {
    10
}

fn default_doom_period() -> u64 {
    60
}

fn default_workers() -> usize {
    4
}
