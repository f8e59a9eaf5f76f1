use std::{fmt, io};

use reqwest::Url;

/// Failure to determine the next call after a QoS condition.
///
/// Every variant is an I/O-class failure from the caller's point of view and
/// converts into [`std::io::Error`].
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// The URL selector has no alternative host for the current URL.
    #[error("failed to determine valid next URL after {url}")]
    NoNextUrl { url: Url },
    /// The redirect target did not resolve to any known base URL.
    #[error(
        "failed to determine valid redirect URL for Location header '{location}' and base URLs {}",
        DisplayUrls(.base_urls)
    )]
    UnresolvedRedirect {
        /// Raw redirect target as sent by the server.
        location: String,
        /// Base URLs known to the selector at the time of the failure.
        base_urls: Vec<Url>,
    },
    /// The dispatcher-wide redirect ceiling has been reached.
    #[error(
        "exceeded the maximum number of allowed redirects ({max_redirects}) for initial URL: {url}"
    )]
    RedirectBudgetExceeded { url: Url, max_redirects: usize },
    /// A QoS signal outside the recognized throttle/unavailable/redirect cases.
    #[error("unknown QoS condition: {0}")]
    UnknownCondition(String),
}

impl DispatchError {
    /// Returns `true` when the URL selector could not produce a target.
    pub fn is_resolution_failure(&self) -> bool {
        matches!(
            self,
            Self::NoNextUrl { .. } | Self::UnresolvedRedirect { .. }
        )
    }

    pub fn is_redirect_budget_exceeded(&self) -> bool {
        matches!(self, Self::RedirectBudgetExceeded { .. })
    }
}

impl From<DispatchError> for io::Error {
    fn from(err: DispatchError) -> Self {
        io::Error::other(err)
    }
}

struct DisplayUrls<'a>(&'a [Url]);

impl fmt::Display for DisplayUrls<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (index, url) in self.0.iter().enumerate() {
            if index > 0 {
                f.write_str(", ")?;
            }
            f.write_str(url.as_str())?;
        }
        f.write_str("]")
    }
}

/// Error type returned by [`QosClient`](crate::QosClient).
#[derive(Debug, thiserror::Error)]
pub enum QosError {
    /// Network or request execution error from `reqwest`.
    #[error("transport error: {0}")]
    Transport(reqwest::Error),
    /// Non-success HTTP status code with raw response body.
    #[error("http error {status}: {body}")]
    Http { status: u16, body: String },
    /// The dispatcher could not determine the next call.
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    /// Invalid client configuration.
    #[error("config error: {0}")]
    Config(String),
}
