//! `qos-http` reacts to server-signaled quality-of-service conditions on
//! HTTP calls.
//!
//! The core is [`QosDispatcher::next_call`], which maps a failed call and its
//! [`QosCondition`] to the call to issue next:
//! - [`QosCondition::Throttle`]: retry the same call
//! - [`QosCondition::Unavailable`]: move to the next host in rotation
//! - [`QosCondition::RetryOther`]: follow a server redirect, bounded by a
//!   dispatcher-wide redirect budget
//!
//! [`QosClient`] drives the dispatcher over a `reqwest` transport.

mod call;
mod client;
mod condition;
mod dispatcher;
mod error;
mod options;
mod transport;
mod url_selector;

pub use call::{Call, CallFactory, Request};
pub use client::QosClient;
pub use condition::QosCondition;
pub use dispatcher::{QosDispatcher, DEFAULT_MAX_REDIRECTS};
pub use error::{DispatchError, QosError};
pub use options::{ClientConfig, ClientOptions};
pub use transport::ReqwestTransport;
pub use url_selector::{RoundRobinUrlSelector, UrlSelector};

pub type Result<T> = std::result::Result<T, QosError>;
