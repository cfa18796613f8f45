//! The upstream boundary: what the cache calls when no tier can answer.
//!
//! The transport is an injected capability. The cache only knows the
//! [`UpstreamFetcher`] contract: given an [`UpstreamRequest`], produce an
//! [`UpstreamResponse`] or fail with an [`UpstreamError`]. No retries and no
//! backoff happen on this side of the boundary.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

use crate::http::{Headers, Method};

pub mod strategy;

pub use strategy::{FnStrategy, RequestStrategy};

/// Errors an upstream fetch can fail with.
///
/// Every variant counts as a transport failure: the cache answers with the
/// last-known-good entry when one exists and propagates the error otherwise.
/// A `5xx` answer is *not* an error; it arrives as an [`UpstreamResponse`].
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("failed to connect to upstream {target}: {reason}")]
    Connect { target: String, reason: String },

    #[error("upstream did not answer within {0:?}")]
    Timeout(Duration),

    #[error("upstream transport error: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("{0}")]
    Other(String),
}

/// Parameters for one upstream call.
///
/// # Examples
///
/// ```
/// use herdcache::upstream::UpstreamRequest;
///
/// let request = UpstreamRequest::get("https://api.example.com/quotes?symbol=ACME")
///     .header("Accept", "application/json");
/// assert_eq!(request.url(), "https://api.example.com/quotes?symbol=ACME");
/// ```
#[derive(Debug, Clone, Default)]
pub struct UpstreamRequest {
    method: Method,
    url: String,
    headers: Headers,
    body: Bytes,
}

impl UpstreamRequest {
    /// Creates a request with the given method and URL and no headers or body.
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Headers::new(),
            body: Bytes::new(),
        }
    }

    /// Shorthand for a `GET` request.
    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::Get, url)
    }

    /// Appends a request header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Sets the request body.
    #[must_use]
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn body_bytes(&self) -> &Bytes {
        &self.body
    }
}

/// The raw status/headers/body triple returned by the upstream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpstreamResponse {
    pub status: u16,
    pub headers: Headers,
    pub body: Bytes,
}

impl UpstreamResponse {
    /// Creates a response with the given status and an empty body.
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: Bytes::new(),
        }
    }

    /// Appends a response header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Sets the response body.
    #[must_use]
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }
}

/// The capability the cache uses to reach the upstream resource.
///
/// Implementations must be `Send + Sync`: one fetcher is shared by every
/// in-flight fetch, and those run as independent Tokio tasks.
#[async_trait]
pub trait UpstreamFetcher: Send + Sync {
    /// Performs exactly one upstream call.
    async fn fetch(&self, request: UpstreamRequest) -> Result<UpstreamResponse, UpstreamError>;
}

/// Adapts an async closure into an [`UpstreamFetcher`].
///
/// # Examples
///
/// ```
/// use herdcache::upstream::{FnFetcher, UpstreamError, UpstreamRequest, UpstreamResponse};
///
/// let fetcher = FnFetcher::new(|_req: UpstreamRequest| async {
///     Ok::<_, UpstreamError>(UpstreamResponse::new(200).body(r#"{"ok":true}"#))
/// });
/// # let _ = fetcher;
/// ```
pub struct FnFetcher<F> {
    f: F,
}

impl<F> FnFetcher<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> UpstreamFetcher for FnFetcher<F>
where
    F: Fn(UpstreamRequest) -> Fut + Send + Sync,
    Fut: Future<Output = Result<UpstreamResponse, UpstreamError>> + Send,
{
    async fn fetch(&self, request: UpstreamRequest) -> Result<UpstreamResponse, UpstreamError> {
        (self.f)(request).await
    }
}
