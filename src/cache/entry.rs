//! Cached snapshots and the response shape the engine hands back.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::http::{CACHE_AGE_HEADER, CACHE_STATUS_HEADER, Headers};

/// Where a response came from, as written to the `X-Cache-Status` header.
///
/// A fresh hit from either tier carries no annotation at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheStatus {
    /// Fetched from the upstream during this call.
    Miss,
    /// Served past its fresh window while a background refresh runs.
    Stale,
    /// Served as the last-known-good fallback after an upstream failure.
    Lkg,
}

impl CacheStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Miss => "MISS",
            Self::Stale => "STALE",
            Self::Lkg => "LKG",
        }
    }

    /// Parses a header value; unknown values yield `None`.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "MISS" => Some(Self::Miss),
            "STALE" => Some(Self::Stale),
            "LKG" => Some(Self::Lkg),
            _ => None,
        }
    }
}

impl fmt::Display for CacheStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How an entry's age relates to the configured windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Younger than the fresh TTL; served with no extra work.
    Fresh,
    /// Past the fresh TTL but inside the stale TTL; served while refreshing.
    Stale,
    /// Past the stale TTL; usable only as a last-known-good fallback.
    Expired,
}

impl Freshness {
    /// Classifies an age against the two windows.
    ///
    /// Both bounds are exclusive: an entry exactly `fresh_ttl` old is stale,
    /// and one exactly `stale_ttl` old is expired.
    pub fn classify(age: Duration, fresh_ttl: Duration, stale_ttl: Duration) -> Self {
        if age < fresh_ttl {
            Self::Fresh
        } else if age < stale_ttl {
            Self::Stale
        } else {
            Self::Expired
        }
    }
}

/// An immutable snapshot of a cached upstream answer.
///
/// Entries are superseded by the next successful fetch for the same key and
/// never deleted by the cache itself. `persisted_at` never moves backwards for
/// a key because only the single in-flight owner of that key writes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub status: u16,
    pub headers: Headers,
    pub body: Value,
    /// Instant after which the entry is no longer fresh in the memory tier.
    pub fresh_until: DateTime<Utc>,
    /// Instant the entry was written.
    pub persisted_at: DateTime<Utc>,
}

impl CacheEntry {
    /// Builds an entry persisted at `now` and fresh for `fresh_ttl`.
    pub fn new(
        status: u16,
        headers: Headers,
        body: Value,
        now: DateTime<Utc>,
        fresh_ttl: Duration,
    ) -> Self {
        Self {
            status,
            headers,
            body,
            fresh_until: add_duration(now, fresh_ttl),
            persisted_at: now,
        }
    }

    /// Returns `true` while `now` is strictly before `fresh_until`.
    pub fn is_fresh_at(&self, now: DateTime<Utc>) -> bool {
        now < self.fresh_until
    }

    /// Time elapsed since the entry was persisted, clamped at zero.
    pub fn age_at(&self, now: DateTime<Utc>) -> Duration {
        (now - self.persisted_at).to_std().unwrap_or(Duration::ZERO)
    }

    /// Copy of this entry with its memory-tier freshness window reset.
    pub fn rewarmed(&self, now: DateTime<Utc>, fresh_ttl: Duration) -> Self {
        Self {
            fresh_until: add_duration(now, fresh_ttl),
            ..self.clone()
        }
    }

    /// The entry as an unannotated response (a fresh hit).
    pub fn to_response(&self) -> CachedResponse {
        CachedResponse {
            status: self.status,
            headers: self.headers.clone(),
            body: self.body.clone(),
        }
    }
}

/// Saturating `DateTime + std::time::Duration`.
pub(crate) fn add_duration(at: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|d| at.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// The engine's answer: status, headers and body, plus cache annotations in
/// the headers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedResponse {
    pub status: u16,
    pub headers: Headers,
    /// Parsed JSON body; `Value::Null` when the upstream body was empty or
    /// could not be parsed.
    pub body: Value,
}

impl CachedResponse {
    /// Sets the `X-Cache-Status` annotation, replacing any existing value.
    #[must_use]
    pub fn with_cache_status(mut self, status: CacheStatus) -> Self {
        self.headers.set(CACHE_STATUS_HEADER, status.as_str());
        self
    }

    /// Marks the response as last-known-good with its age in milliseconds.
    #[must_use]
    pub fn with_lkg_age(self, age: Duration) -> Self {
        let mut resp = self.with_cache_status(CacheStatus::Lkg);
        resp.headers
            .set(CACHE_AGE_HEADER, age.as_millis().to_string());
        resp
    }

    /// The cache-status annotation, or `None` for a fresh hit.
    pub fn cache_status(&self) -> Option<CacheStatus> {
        self.headers
            .get(CACHE_STATUS_HEADER)
            .and_then(CacheStatus::parse)
    }

    /// Age of a last-known-good response, if this is one.
    pub fn lkg_age(&self) -> Option<Duration> {
        if self.cache_status() != Some(CacheStatus::Lkg) {
            return None;
        }
        self.headers
            .get(CACHE_AGE_HEADER)?
            .parse()
            .ok()
            .map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;
    use serde_json::json;

    fn t(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(ms).unwrap()
    }

    #[test]
    fn fresh_until_is_exclusive() {
        let e = CacheEntry::new(200, Headers::new(), json!({}), t(0), Duration::from_secs(10));
        assert!(e.is_fresh_at(t(9_999)));
        assert!(!e.is_fresh_at(t(10_000)));
    }

    #[test]
    fn age_clamps_clock_skew_to_zero() {
        let e = CacheEntry::new(200, Headers::new(), json!(1), t(5_000), Duration::ZERO);
        assert_eq!(e.age_at(t(1_000)), Duration::ZERO);
        assert_eq!(e.age_at(t(7_500)), Duration::from_millis(2_500));
    }

    #[test]
    fn rewarm_keeps_persisted_at() {
        let e = CacheEntry::new(200, Headers::new(), json!(1), t(0), Duration::from_secs(10));
        let warm = e.rewarmed(t(8_000), Duration::from_secs(10));
        assert_eq!(warm.persisted_at, t(0));
        assert_eq!(warm.fresh_until, t(18_000));
    }

    #[test]
    fn lkg_annotation_round_trips() {
        let resp = CachedResponse {
            status: 200,
            headers: Headers::new(),
            body: json!({"price": 1}),
        }
        .with_lkg_age(Duration::from_millis(70_000));

        assert_eq!(resp.cache_status(), Some(CacheStatus::Lkg));
        assert_eq!(resp.lkg_age(), Some(Duration::from_millis(70_000)));
        assert_eq!(resp.headers.get("x-cache-age"), Some("70000"));
    }

    #[test]
    fn fresh_hit_has_no_annotation() {
        let e = CacheEntry::new(200, Headers::new(), json!(1), t(0), Duration::from_secs(1));
        let resp = e.to_response();
        assert_eq!(resp.cache_status(), None);
        assert_eq!(resp.lkg_age(), None);
    }

    #[test]
    fn entry_survives_json_encoding() {
        let mut headers = Headers::new();
        headers.insert("Content-Type", "application/json");
        let e = CacheEntry::new(201, headers, json!({"a": [1, 2]}), t(42), Duration::from_secs(3));
        let bytes = serde_json::to_vec(&e).unwrap();
        let back: CacheEntry = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(back, e);
    }

    fn rank(f: Freshness) -> u8 {
        match f {
            Freshness::Fresh => 0,
            Freshness::Stale => 1,
            Freshness::Expired => 2,
        }
    }

    proptest! {
        #[test]
        fn classification_never_moves_backwards(
            a in 0u64..200_000,
            b in 0u64..200_000,
            fresh in 0u64..100_000,
            extra in 0u64..100_000,
        ) {
            let (younger, older) = if a <= b { (a, b) } else { (b, a) };
            let fresh = Duration::from_millis(fresh);
            let stale = fresh + Duration::from_millis(extra);
            let first = Freshness::classify(Duration::from_millis(younger), fresh, stale);
            let second = Freshness::classify(Duration::from_millis(older), fresh, stale);
            prop_assert!(rank(first) <= rank(second));
        }

        #[test]
        fn boundaries_are_exclusive(fresh in 1u64..100_000, extra in 1u64..100_000) {
            let fresh = Duration::from_millis(fresh);
            let stale = fresh + Duration::from_millis(extra);
            prop_assert_eq!(Freshness::classify(fresh, fresh, stale), Freshness::Stale);
            prop_assert_eq!(Freshness::classify(stale, fresh, stale), Freshness::Expired);
        }
    }
}
