use serde::Deserialize;

use crate::{dispatcher::DEFAULT_MAX_REDIRECTS, QosError, Result};

/// Configures HTTP timeout, retry and redirect behavior.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(default)]
pub struct ClientOptions {
    /// Per-request timeout in milliseconds.
    pub timeout_ms: u64,
    /// Maximum number of QoS retries after the initial attempt.
    pub max_retries: usize,
    /// Base retry backoff in milliseconds (exponential strategy).
    pub retry_backoff_ms: u64,
    /// Ceiling on server-directed redirects over the client's lifetime.
    pub max_redirects: usize,
    /// Upper bound on a server-requested `Retry-After` delay, in milliseconds.
    pub max_retry_after_ms: u64,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            max_retries: 4,
            retry_backoff_ms: 250,
            max_redirects: DEFAULT_MAX_REDIRECTS,
            max_retry_after_ms: 30_000,
        }
    }
}

/// Base URLs plus options, as loaded from a JSON document.
///
/// ```
/// use qos_http::ClientConfig;
///
/// let config = ClientConfig::from_json(
///     r#"{ "base_urls": ["https://a.example/api", "https://b.example/api"],
///          "options": { "max_retries": 2 } }"#,
/// )
/// .unwrap();
/// assert_eq!(config.options.max_retries, 2);
/// assert_eq!(config.options.max_redirects, 20);
/// ```
#[derive(Clone, Debug, Eq, PartialEq, Deserialize)]
pub struct ClientConfig {
    pub base_urls: Vec<String>,
    #[serde(default)]
    pub options: ClientOptions,
}

impl ClientConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|err| QosError::Config(format!("invalid client config JSON: {err}")))
    }
}
