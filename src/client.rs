use std::{fmt, sync::Arc, time::Duration};

use reqwest::{
    header::{HeaderValue, CONTENT_TYPE},
    Method, Url,
};
use serde::Serialize;
use tokio::time::sleep;

use crate::{
    Call, CallFactory, ClientConfig, ClientOptions, QosCondition, QosDispatcher, QosError,
    ReqwestTransport, Request, Result, RoundRobinUrlSelector, UrlSelector,
};

/// HTTP client that retries QoS failures across a rotation of base URLs.
///
/// Clones share one [`QosDispatcher`], so the redirect budget is counted
/// across every request issued through any clone.
#[derive(Clone)]
pub struct QosClient {
    transport: Arc<ReqwestTransport>,
    dispatcher: Arc<QosDispatcher>,
    options: ClientOptions,
}

impl fmt::Debug for QosClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QosClient")
            .field("dispatcher", &self.dispatcher)
            .field("options", &self.options)
            .finish()
    }
}

impl QosClient {
    /// Creates a client rotating over `base_urls` with default options.
    pub fn new<I, S>(base_urls: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let selector = RoundRobinUrlSelector::new(base_urls)?;
        Self::with_selector(Arc::new(selector), ClientOptions::default())
    }

    /// Creates a client with a custom URL selection policy.
    pub fn with_selector(urls: Arc<dyn UrlSelector>, options: ClientOptions) -> Result<Self> {
        let transport = ReqwestTransport::new(Duration::from_millis(options.timeout_ms))?;
        Ok(Self::assemble(urls, Arc::new(transport), options))
    }

    pub fn from_config(config: ClientConfig) -> Result<Self> {
        let selector = RoundRobinUrlSelector::new(&config.base_urls)?;
        Self::with_selector(Arc::new(selector), config.options)
    }

    /// Creates a client from environment variables.
    ///
    /// Reads:
    /// - `QOS_BASE_URLS` — comma-separated base URLs (required)
    /// - `QOS_TIMEOUT_MS`, `QOS_MAX_RETRIES`, `QOS_RETRY_BACKOFF_MS`,
    ///   `QOS_MAX_REDIRECTS`, `QOS_MAX_RETRY_AFTER_MS` — optional overrides
    ///   of [`ClientOptions`]
    ///
    /// # Example
    ///
    /// ```no_run
    /// use qos_http::QosClient;
    ///
    /// let client = QosClient::from_env().expect("missing QOS_BASE_URLS");
    /// ```
    pub fn from_env() -> Result<Self> {
        let raw = std::env::var("QOS_BASE_URLS").map_err(|_| {
            QosError::Config("missing QOS_BASE_URLS environment variable".to_owned())
        })?;
        let base_urls: Vec<String> = raw
            .split(',')
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .map(str::to_owned)
            .collect();
        if base_urls.is_empty() {
            return Err(QosError::Config(
                "QOS_BASE_URLS is set but empty".to_owned(),
            ));
        }

        let defaults = ClientOptions::default();
        let options = ClientOptions {
            timeout_ms: env_or("QOS_TIMEOUT_MS", defaults.timeout_ms)?,
            max_retries: env_or("QOS_MAX_RETRIES", defaults.max_retries)?,
            retry_backoff_ms: env_or("QOS_RETRY_BACKOFF_MS", defaults.retry_backoff_ms)?,
            max_redirects: env_or("QOS_MAX_REDIRECTS", defaults.max_redirects)?,
            max_retry_after_ms: env_or(
                "QOS_MAX_RETRY_AFTER_MS",
                defaults.max_retry_after_ms,
            )?,
        };

        Self::from_config(ClientConfig { base_urls, options })
    }

    /// Applies client options such as timeout, retry and redirect limits.
    ///
    /// The dispatcher is rebuilt, so the redirect budget starts from zero.
    pub fn with_options(self, opts: ClientOptions) -> Self {
        let transport = Arc::new(
            self.transport
                .with_timeout(Duration::from_millis(opts.timeout_ms)),
        );
        let urls = Arc::clone(self.dispatcher.url_selector());
        Self::assemble(urls, transport, opts)
    }

    fn assemble(
        urls: Arc<dyn UrlSelector>,
        transport: Arc<ReqwestTransport>,
        options: ClientOptions,
    ) -> Self {
        let calls: Arc<dyn CallFactory> = transport.clone();
        let dispatcher = QosDispatcher::new(urls, calls).with_max_redirects(options.max_redirects);
        Self {
            transport,
            dispatcher: Arc::new(dispatcher),
            options,
        }
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    pub fn dispatcher(&self) -> &QosDispatcher {
        &self.dispatcher
    }

    /// Resolves `path` against the first base URL.
    pub fn url(&self, path: &str) -> Result<Url> {
        let base = self
            .dispatcher
            .url_selector()
            .base_urls()
            .into_iter()
            .next()
            .ok_or_else(|| QosError::Config("URL selector has no base URLs".to_owned()))?;
        let joined = format!(
            "{}/{}",
            base.as_str().trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        Url::parse(&joined)
            .map_err(|err| QosError::Config(format!("invalid request path '{path}': {err}")))
    }

    pub async fn get(&self, path: &str) -> Result<reqwest::Response> {
        let request = Request::new(Method::GET, self.url(path)?);
        self.execute(request).await
    }

    /// Sends `body` as JSON with `POST`.
    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<reqwest::Response> {
        let payload = serde_json::to_vec(body)
            .map_err(|err| QosError::Config(format!("unserializable request body: {err}")))?;
        let request = Request::new(Method::POST, self.url(path)?)
            .with_header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .with_body(payload);
        self.execute(request).await
    }

    /// Executes `request`, following QoS conditions until a non-QoS response
    /// arrives or retries run out.
    ///
    /// Successful responses are returned unread. Non-success responses fail
    /// with [`QosError::Http`] carrying the body of the last attempt.
    pub async fn execute(&self, request: Request) -> Result<reqwest::Response> {
        let mut call = self.transport.new_call(request);
        let mut attempt = 0usize;
        loop {
            let retries_left = attempt < self.options.max_retries;

            let condition = match self.transport.execute(&call).await {
                Ok(response) => {
                    let status = response.status();
                    // Out of retries, every non-success status surfaces as-is.
                    let condition = if retries_left {
                        QosCondition::from_response(status, response.headers())?
                    } else {
                        None
                    };
                    match condition {
                        Some(condition) => condition,
                        None if status.is_success() => return Ok(response),
                        None => {
                            let body = response.text().await.map_err(QosError::Transport)?;
                            return Err(QosError::Http {
                                status: status.as_u16(),
                                body,
                            });
                        }
                    }
                }
                Err(err) => {
                    if retries_left && self.should_fail_over(&err) {
                        self.wait_before_retry(&QosCondition::Unavailable, attempt)
                            .await;
                        call = self.fail_over(&call);
                        attempt += 1;
                        continue;
                    }
                    return Err(QosError::Transport(err));
                }
            };

            #[cfg(feature = "tracing")]
            tracing::debug!(
                url = %call.request().url(),
                attempt,
                ?condition,
                "QoS condition received"
            );

            self.wait_before_retry(&condition, attempt).await;
            call = self.dispatcher.next_call(&call, &condition)?;
            attempt += 1;
        }
    }

    // Transport failures count as an unavailable host. With no other host
    // to move to, the same call is retried.
    fn fail_over(&self, call: &Call) -> Call {
        match self.dispatcher.next_call(call, &QosCondition::Unavailable) {
            Ok(next) => next,
            Err(_err) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(error = %_err, "no failover target; retrying same host");
                self.transport.clone_call(call)
            }
        }
    }

    fn should_fail_over(&self, err: &reqwest::Error) -> bool {
        err.is_connect() || err.is_timeout()
    }

    /// Waits before the next attempt.
    ///
    /// Throttles honor the server's `Retry-After` when present, capped at
    /// `max_retry_after_ms`; otherwise
    /// throttles and unavailable hosts back off exponentially. Redirects are
    /// followed immediately.
    async fn wait_before_retry(&self, condition: &QosCondition, attempt: usize) {
        let delay = match condition {
            QosCondition::Throttle {
                retry_after: Some(retry_after),
            } => {
                let cap = Duration::from_millis(self.options.max_retry_after_ms);
                (*retry_after).min(cap)
            }
            QosCondition::Throttle { retry_after: None } | QosCondition::Unavailable => {
                let exp = attempt.min(16) as u32;
                let multiplier = 1u64 << exp;
                Duration::from_millis(self.options.retry_backoff_ms.saturating_mul(multiplier))
            }
            QosCondition::RetryOther(_) => Duration::ZERO,
        };

        if delay.is_zero() {
            return;
        }

        #[cfg(feature = "tracing")]
        tracing::debug!("retrying request after {} ms", delay.as_millis());

        sleep(delay).await;
    }
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> Result<T> {
    match std::env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|_| QosError::Config(format!("{name} must be a non-negative integer"))),
        _ => Ok(default),
    }
}
