use std::{fmt, time::Duration};

use crate::{Call, CallFactory, QosError, Request, Result};

/// Executes calls with a shared `reqwest::Client`.
#[derive(Clone)]
pub struct ReqwestTransport {
    http: reqwest::Client,
    timeout: Duration,
}

impl fmt::Debug for ReqwestTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReqwestTransport")
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl ReqwestTransport {
    /// Builds a transport whose client does not follow redirects.
    pub fn new(timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(QosError::Transport)?;
        Ok(Self::with_client(http, timeout))
    }

    /// Uses a preconfigured client, e.g. one with custom TLS or proxies.
    ///
    /// The client should be built with `redirect::Policy::none()`, otherwise
    /// `308` responses are followed before the dispatcher sees them.
    pub fn with_client(http: reqwest::Client, timeout: Duration) -> Self {
        Self { http, timeout }
    }

    /// Same client, different per-call timeout.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        Self::with_client(self.http.clone(), timeout)
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Sends the call's request exactly as recorded.
    ///
    /// Redirect statuses are returned as-is; following them is the
    /// dispatcher's job.
    pub async fn execute(
        &self,
        call: &Call,
    ) -> std::result::Result<reqwest::Response, reqwest::Error> {
        let request = call.request();
        let mut builder = self
            .http
            .request(request.method().clone(), request.url().clone())
            .headers(request.headers().clone())
            .timeout(self.timeout);
        if let Some(body) = request.body() {
            builder = builder.body(body.to_vec());
        }
        builder.send().await
    }
}

impl CallFactory for ReqwestTransport {
    fn new_call(&self, request: Request) -> Call {
        Call::new(request)
    }
}
