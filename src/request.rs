use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use reqwest::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::{Method, Request as ReqwestRequest, Url};
use serde_json::Value;
use tracing::debug;

use crate::error::Result;

/// Request body types
#[derive(Clone, Default, PartialEq)]
pub enum Body {
    /// No body
    #[default]
    Empty,
    /// Raw bytes
    Bytes(Vec<u8>),
    /// Text
    Text(String),
    /// A value serialized as JSON when the request is built
    Json(Value),
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Body::Empty => write!(f, "Empty"),
            Body::Bytes(bytes) => write!(f, "Bytes({} bytes)", bytes.len()),
            Body::Text(text) => write!(f, "Text({} chars)", text.chars().count()),
            Body::Json(json) => write!(f, "Json({})", json),
        }
    }
}

/// Builder for creating HTTP requests
///
/// The builder is not tied to a client; [`RequestBuilder::build`] produces a
/// plain `reqwest::Request` that any [`crate::Client`] can execute.
///
/// # Examples
///
/// ```rust
/// use httpext::RequestBuilder;
///
/// let request = RequestBuilder::get()
///     .url("https://api.example.com/items")
///     .query("page", "2")
///     .header("Accept", "application/json")
///     .build()?;
///
/// assert_eq!(request.url().as_str(), "https://api.example.com/items?page=2");
/// # Ok::<(), httpext::Error>(())
/// ```
#[derive(Clone, Debug, Default)]
pub struct RequestBuilder {
    method: Method,
    url: String,
    headers: HashMap<String, String>,
    query: Vec<(String, String)>,
    body: Body,
    timeout: Option<Duration>,
}

impl RequestBuilder {
    /// Create a new request builder, defaulting to GET
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a GET request builder
    pub fn get() -> Self {
        Self::new().method(Method::GET)
    }

    /// Create a POST request builder
    pub fn post() -> Self {
        Self::new().method(Method::POST)
    }

    /// Create a PUT request builder
    pub fn put() -> Self {
        Self::new().method(Method::PUT)
    }

    /// Create a PATCH request builder
    pub fn patch() -> Self {
        Self::new().method(Method::PATCH)
    }

    /// Create a DELETE request builder
    pub fn delete() -> Self {
        Self::new().method(Method::DELETE)
    }

    /// Set the HTTP method
    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Set the URL
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// Add a query parameter; repeated keys are kept in order
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Set a header, replacing any previous value for the same key
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Replace all headers
    pub fn headers<I, K, V>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.headers = headers
            .into_iter()
            .map(|(name, value)| (name.into(), value.into()))
            .collect();
        self
    }

    /// Set the body
    pub fn body(mut self, body: Body) -> Self {
        self.body = body;
        self
    }

    /// Set text body
    pub fn text(self, body: impl Into<String>) -> Self {
        self.body(Body::Text(body.into()))
    }

    /// Set bytes body
    pub fn bytes(self, body: impl Into<Vec<u8>>) -> Self {
        self.body(Body::Bytes(body.into()))
    }

    /// Set JSON body
    pub fn json<T>(self, body: &T) -> Result<Self>
    where
        T: serde::Serialize + ?Sized,
    {
        let json = serde_json::to_value(body)?;
        Ok(self.body(Body::Json(json)))
    }

    /// Set a timeout for this request only
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Get the HTTP method
    pub fn get_method(&self) -> &Method {
        &self.method
    }

    /// Build the request
    pub fn build(&self) -> Result<ReqwestRequest> {
        let url = self.build_url()?;
        let mut request = ReqwestRequest::new(self.method.clone(), url);

        let headers = request.headers_mut();
        for (name, value) in &self.headers {
            headers.insert(
                HeaderName::from_bytes(name.as_bytes())?,
                HeaderValue::from_str(value)?,
            );
        }

        *request.body_mut() = match &self.body {
            Body::Empty => None,
            Body::Bytes(bytes) => Some(bytes.clone().into()),
            Body::Text(text) => Some(text.clone().into()),
            Body::Json(json) => {
                if !request.headers().contains_key(CONTENT_TYPE) {
                    request
                        .headers_mut()
                        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
                }
                Some(serde_json::to_vec(json)?.into())
            }
        };
        *request.timeout_mut() = self.timeout;

        debug!(method = %request.method(), url = %request.url(), body = ?self.body, "built request");
        Ok(request)
    }

    fn build_url(&self) -> Result<Url> {
        let mut url = Url::parse(&self.url)?;
        if !self.query.is_empty() {
            url.query_pairs_mut().extend_pairs(&self.query);
        }
        Ok(url)
    }
}
