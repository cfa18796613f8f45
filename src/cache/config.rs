//! Engine configuration and the cacheability policy.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Rejected configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("stale TTL ({stale:?}) must not be shorter than fresh TTL ({fresh:?})")]
    StaleShorterThanFresh { fresh: Duration, stale: Duration },

    #[error("upstream timeout must be greater than zero")]
    ZeroTimeout,
}

/// Which upstream statuses get written to the cache tiers.
///
/// Responses that fail the predicate are still returned to the caller, tagged
/// `MISS`, but leave both tiers untouched.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheablePolicy {
    /// Cache only `status < 400`.
    #[default]
    SuccessOnly,
    /// Cache `status < 500`, so 4xx answers are cached too.
    BelowServerError,
    /// Cache every status. Pair with `lkg_fallback = false` to reproduce a
    /// cache that never substitutes a last-known-good entry.
    Always,
    /// A caller-supplied predicate.
    #[serde(skip)]
    Custom(fn(u16) -> bool),
}

impl CacheablePolicy {
    pub fn is_cacheable(&self, status: u16) -> bool {
        match self {
            Self::SuccessOnly => status < 400,
            Self::BelowServerError => status < 500,
            Self::Always => true,
            Self::Custom(predicate) => predicate(status),
        }
    }
}

// Custom predicates compare by function address.
impl PartialEq for CacheablePolicy {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Custom(a), Self::Custom(b)) => std::ptr::fn_addr_eq(*a, *b),
            _ => std::mem::discriminant(self) == std::mem::discriminant(other),
        }
    }
}

impl Eq for CacheablePolicy {}

/// Configuration for [`CoalescingCache`](super::CoalescingCache).
///
/// Deserializes with every field optional; durations are in milliseconds.
///
/// ```
/// use std::time::Duration;
/// use herdcache::cache::CacheConfig;
///
/// let config: CacheConfig =
///     serde_json::from_str(r#"{"fresh_ttl": 5000, "upstream_timeout": 2000}"#).unwrap();
/// assert_eq!(config.fresh_ttl, Duration::from_secs(5));
/// assert_eq!(config.stale_ttl, Duration::from_secs(60));
/// assert_eq!(config.upstream_timeout, Some(Duration::from_secs(2)));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Window during which an entry is served without revalidation.
    #[serde(with = "millis")]
    pub fresh_ttl: Duration,
    /// Outer window during which an expired entry is served while a refresh
    /// runs in the background.
    #[serde(with = "millis")]
    pub stale_ttl: Duration,
    /// Upper bound on a single upstream call. `None` waits indefinitely.
    #[serde(with = "millis_opt")]
    pub upstream_timeout: Option<Duration>,
    pub cacheable: CacheablePolicy,
    /// Substitute the persisted entry when the upstream fails or answers 5xx.
    pub lkg_fallback: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            fresh_ttl: Duration::from_millis(10_000),
            stale_ttl: Duration::from_millis(60_000),
            upstream_timeout: None,
            cacheable: CacheablePolicy::default(),
            lkg_fallback: true,
        }
    }
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fresh_ttl(mut self, ttl: Duration) -> Self {
        self.fresh_ttl = ttl;
        self
    }

    pub fn with_stale_ttl(mut self, ttl: Duration) -> Self {
        self.stale_ttl = ttl;
        self
    }

    pub fn with_upstream_timeout(mut self, timeout: Duration) -> Self {
        self.upstream_timeout = Some(timeout);
        self
    }

    pub fn with_cacheable(mut self, policy: CacheablePolicy) -> Self {
        self.cacheable = policy;
        self
    }

    pub fn with_lkg_fallback(mut self, enabled: bool) -> Self {
        self.lkg_fallback = enabled;
        self
    }

    /// Checks the invariants the engine relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.stale_ttl < self.fresh_ttl {
            return Err(ConfigError::StaleShorterThanFresh {
                fresh: self.fresh_ttl,
                stale: self.stale_ttl,
            });
        }
        if self.upstream_timeout == Some(Duration::ZERO) {
            return Err(ConfigError::ZeroTimeout);
        }
        Ok(())
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

mod millis_opt {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_some(&u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_windows() {
        let config = CacheConfig::default();
        assert_eq!(config.fresh_ttl, Duration::from_millis(10_000));
        assert_eq!(config.stale_ttl, Duration::from_millis(60_000));
        assert_eq!(config.upstream_timeout, None);
        assert_eq!(config.cacheable, CacheablePolicy::SuccessOnly);
        assert!(config.lkg_fallback);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn stale_shorter_than_fresh_is_rejected() {
        let config = CacheConfig::new()
            .with_fresh_ttl(Duration::from_secs(30))
            .with_stale_ttl(Duration::from_secs(10));
        assert!(matches!(
            config.validate(),
            Err(ConfigError::StaleShorterThanFresh { .. })
        ));
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let config = CacheConfig::new().with_upstream_timeout(Duration::ZERO);
        assert_eq!(config.validate(), Err(ConfigError::ZeroTimeout));
    }

    #[test]
    fn policies() {
        assert!(CacheablePolicy::SuccessOnly.is_cacheable(304));
        assert!(!CacheablePolicy::SuccessOnly.is_cacheable(404));
        assert!(CacheablePolicy::BelowServerError.is_cacheable(404));
        assert!(!CacheablePolicy::BelowServerError.is_cacheable(502));
        assert!(CacheablePolicy::Always.is_cacheable(503));

        fn only_ok(status: u16) -> bool {
            status == 200
        }
        let custom = CacheablePolicy::Custom(only_ok);
        assert!(custom.is_cacheable(200));
        assert!(!custom.is_cacheable(204));
    }

    #[test]
    fn policy_equality() {
        fn only_ok(status: u16) -> bool {
            status == 200
        }
        let custom = CacheablePolicy::Custom(only_ok);
        assert_eq!(custom, custom);
        assert_ne!(custom, CacheablePolicy::Always);
        assert_eq!(CacheablePolicy::SuccessOnly, CacheablePolicy::default());
        assert_ne!(CacheablePolicy::SuccessOnly, CacheablePolicy::BelowServerError);
    }

    #[test]
    fn deserializes_policy_and_flags() {
        let config: CacheConfig = serde_json::from_str(
            r#"{"stale_ttl": 120000, "cacheable": "below_server_error", "lkg_fallback": false}"#,
        )
        .unwrap();
        assert_eq!(config.fresh_ttl, Duration::from_millis(10_000));
        assert_eq!(config.stale_ttl, Duration::from_millis(120_000));
        assert_eq!(config.cacheable, CacheablePolicy::BelowServerError);
        assert!(!config.lkg_fallback);
    }
}
