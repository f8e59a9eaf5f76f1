use std::time::Duration;

use reqwest::{
    header::{HeaderMap, LOCATION, RETRY_AFTER},
    StatusCode,
};

use crate::DispatchError;

/// Server-signaled quality-of-service condition attached to a failed call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum QosCondition {
    /// Retry the same target later.
    Throttle {
        /// Server-requested delay from the `Retry-After` header, if any.
        retry_after: Option<Duration>,
    },
    /// The current target is down; pick another host from the rotation.
    Unavailable,
    /// Retry against the given target (absolute or relative URL).
    RetryOther(String),
}

impl QosCondition {
    pub fn throttle() -> Self {
        Self::Throttle { retry_after: None }
    }

    pub fn retry_other(target: impl Into<String>) -> Self {
        Self::RetryOther(target.into())
    }

    /// Classifies a response status into a QoS condition.
    ///
    /// - `429` → [`QosCondition::Throttle`]
    /// - `503` → [`QosCondition::Unavailable`]
    /// - `308` → [`QosCondition::RetryOther`] with the `Location` header
    ///
    /// Returns `Ok(None)` for statuses that carry no QoS meaning. A `308`
    /// without a usable `Location` is an [`DispatchError::UnknownCondition`].
    pub fn from_response(
        status: StatusCode,
        headers: &HeaderMap,
    ) -> Result<Option<Self>, DispatchError> {
        match status {
            StatusCode::TOO_MANY_REQUESTS => Ok(Some(Self::Throttle {
                retry_after: parse_retry_after(headers),
            })),
            StatusCode::SERVICE_UNAVAILABLE => Ok(Some(Self::Unavailable)),
            StatusCode::PERMANENT_REDIRECT => {
                let location = headers
                    .get(LOCATION)
                    .and_then(|value| value.to_str().ok())
                    .map(str::trim)
                    .filter(|value| !value.is_empty())
                    .ok_or_else(|| {
                        DispatchError::UnknownCondition(format!(
                            "{status} response without a usable Location header"
                        ))
                    })?;
                Ok(Some(Self::RetryOther(location.to_owned())))
            }
            _ => Ok(None),
        }
    }
}

// Only the delta-seconds form is honored.
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}
