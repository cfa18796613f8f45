//! Mapping caller parameters to a cache key and an upstream request.

use super::UpstreamRequest;

/// Derives the two things the cache needs from a caller's parameters.
///
/// Two parameter values that produce the same [`cache_key`](Self::cache_key)
/// are interchangeable: they share cache entries and in-flight fetches, so the
/// key must capture everything that changes the upstream answer.
pub trait RequestStrategy: Send + Sync {
    /// The caller-facing parameter type.
    type Params: ?Sized;

    fn cache_key(&self, params: &Self::Params) -> String;

    fn upstream_request(&self, params: &Self::Params) -> UpstreamRequest;
}

/// A [`RequestStrategy`] built from two closures.
///
/// # Examples
///
/// ```
/// use herdcache::upstream::{FnStrategy, RequestStrategy, UpstreamRequest};
///
/// let strategy = FnStrategy::new(
///     |symbol: &str| format!("quote:{symbol}"),
///     |symbol: &str| UpstreamRequest::get(format!("https://api.example.com/q/{symbol}")),
/// );
/// assert_eq!(strategy.cache_key("ACME"), "quote:ACME");
/// ```
pub struct FnStrategy<K, U> {
    key: K,
    request: U,
}

impl<K, U> FnStrategy<K, U> {
    pub fn new(key: K, request: U) -> Self {
        Self { key, request }
    }
}

impl<K, U> RequestStrategy for FnStrategy<K, U>
where
    K: Fn(&str) -> String + Send + Sync,
    U: Fn(&str) -> UpstreamRequest + Send + Sync,
{
    type Params = str;

    fn cache_key(&self, params: &str) -> String {
        (self.key)(params)
    }

    fn upstream_request(&self, params: &str) -> UpstreamRequest {
        (self.request)(params)
    }
}
