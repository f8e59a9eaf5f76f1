use reqwest::{
    header::{HeaderMap, HeaderName, HeaderValue},
    Method, Url,
};

/// Immutable description of an HTTP request.
///
/// Only the URL is ever rewritten by the dispatcher; method, headers and body
/// are carried over unchanged.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Request {
    method: Method,
    url: Url,
    headers: HeaderMap,
    body: Option<Vec<u8>>,
}

impl Request {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: None,
        }
    }

    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: Url) -> Self {
        Self::new(Method::POST, url)
    }

    /// Appends a header, keeping any existing values for the same name.
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Returns a copy of this request targeting `url`.
    pub fn with_url(&self, url: Url) -> Self {
        Self {
            url,
            ..self.clone()
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> Option<&[u8]> {
        self.body.as_deref()
    }
}

/// An unsent call wrapping exactly one [`Request`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Call {
    request: Request,
}

impl Call {
    pub fn new(request: Request) -> Self {
        Self { request }
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn into_request(self) -> Request {
        self.request
    }
}

/// Builds calls for a transport.
///
/// Implementations must be shareable across threads; the dispatcher calls
/// them concurrently.
pub trait CallFactory: Send + Sync {
    /// Builds a fresh, unsent call from `request`.
    fn new_call(&self, request: Request) -> Call;

    /// Returns an unsent duplicate of `call`.
    fn clone_call(&self, call: &Call) -> Call {
        call.clone()
    }
}
