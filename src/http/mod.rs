//! HTTP vocabulary shared by the cache and the upstream boundary.
//!
//! This module provides [`Method`], [`Headers`], the names of the headers the
//! cache writes, and the server-error predicate. Statuses are plain `u16`
//! values: the upstream may answer with any code and the cache replays it
//! verbatim.

use std::fmt;

pub mod headers;

pub use headers::Headers;

/// Header carrying the cache-status annotation (`MISS`, `STALE` or `LKG`).
pub const CACHE_STATUS_HEADER: &str = "X-Cache-Status";

/// Header carrying the age, in milliseconds, of a last-known-good response.
pub const CACHE_AGE_HEADER: &str = "X-Cache-Age";

/// Returns `true` for `5xx` statuses and anything above them.
pub fn is_server_error(status: u16) -> bool {
    status >= 500
}

/// An HTTP request method for the upstream call.
///
/// # Examples
///
/// ```
/// use herdcache::http::Method;
///
/// let method: Method = "GET".parse().unwrap();
/// assert_eq!(method, Method::Get);
/// assert!(method.is_safe());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub enum Method {
    #[default]
    Get,
    Head,
    Post,
    Put,
    Delete,
    Options,
    Patch,
    /// A non-standard extension method.
    Custom(String),
}

impl Method {
    /// Returns the method as a string slice.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Get => "GET",
            Self::Head => "HEAD",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Options => "OPTIONS",
            Self::Patch => "PATCH",
            Self::Custom(s) => s.as_str(),
        }
    }

    /// Returns `true` if this method is "safe" (RFC 9110 §9.2.1).
    ///
    /// Informational only: the cache coalesces by key and never inspects the
    /// method, so a strategy keying unsafe requests must make the key unique.
    pub fn is_safe(&self) -> bool {
        matches!(self, Self::Get | Self::Head | Self::Options)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Method {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "GET" => Self::Get,
            "HEAD" => Self::Head,
            "POST" => Self::Post,
            "PUT" => Self::Put,
            "DELETE" => Self::Delete,
            "OPTIONS" => Self::Options,
            "PATCH" => Self::Patch,
            other => Self::Custom(other.to_owned()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classes() {
        assert!(is_server_error(500));
        assert!(is_server_error(503));
        assert!(!is_server_error(499));
        assert!(is_server_error(600));
        assert!(is_server_error(u16::MAX));
    }

    #[test]
    fn custom_method_round_trips() {
        let m: Method = "PURGE".parse().unwrap();
        assert_eq!(m, Method::Custom("PURGE".into()));
        assert_eq!(m.to_string(), "PURGE");
        assert!(!m.is_safe());
    }
}
