//! The coalescing cache engine.

use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::CacheError;
use super::clock::{Clock, SystemClock};
use super::config::{CacheConfig, ConfigError};
use super::entry::{CacheEntry, CacheStatus, CachedResponse, Freshness};
use super::inflight::{FetchKind, FetchOutcome, InFlightRegistry};
use super::stats::{CacheStats, StatsRecorder};
use super::tier::{MemoryTier, PersistentTier};
use crate::http::{CACHE_AGE_HEADER, CACHE_STATUS_HEADER, is_server_error};
use crate::upstream::{
    RequestStrategy, UpstreamError, UpstreamFetcher, UpstreamRequest, UpstreamResponse,
};

/// Builder for [`CoalescingCache`].
///
/// # Examples
///
/// ```rust,no_run
/// use std::{sync::Arc, time::Duration};
/// use herdcache::cache::{CacheConfig, CoalescingCache, InMemoryStore};
/// use herdcache::upstream::{FnFetcher, UpstreamResponse};
///
/// let fetcher = FnFetcher::new(|_req| async { Ok(UpstreamResponse::new(204)) });
/// let cache = CoalescingCache::builder(Arc::new(InMemoryStore::new()), Arc::new(fetcher))
///     .config(CacheConfig::new().with_upstream_timeout(Duration::from_secs(5)))
///     .build()
///     .expect("valid config");
/// ```
pub struct CacheBuilder {
    persistent: Arc<dyn PersistentTier>,
    upstream: Arc<dyn UpstreamFetcher>,
    config: CacheConfig,
    clock: Arc<dyn Clock>,
}

impl CacheBuilder {
    #[must_use]
    pub fn config(mut self, config: CacheConfig) -> Self {
        self.config = config;
        self
    }

    /// Replaces the system clock, typically with a [`ManualClock`](super::ManualClock).
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Validates the configuration and builds the engine.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] when the TTLs or timeout are inconsistent.
    pub fn build(self) -> Result<CoalescingCache, ConfigError> {
        self.config.validate()?;
        Ok(CoalescingCache {
            inner: Arc::new(Inner {
                config: self.config,
                memory: MemoryTier::new(),
                persistent: self.persistent,
                upstream: self.upstream,
                clock: self.clock,
                inflight: InFlightRegistry::new(),
                stats: StatsRecorder::default(),
            }),
        })
    }
}

/// Request-coalescing cache over a memory tier, a persistent tier and an
/// upstream fetcher.
///
/// Cheap to clone; clones share tiers, in-flight fetches and statistics.
/// Fetches run on spawned Tokio tasks, so every method that may fetch must be
/// called from within a Tokio runtime.
#[derive(Clone)]
pub struct CoalescingCache {
    inner: Arc<Inner>,
}

struct Inner {
    config: CacheConfig,
    memory: MemoryTier,
    persistent: Arc<dyn PersistentTier>,
    upstream: Arc<dyn UpstreamFetcher>,
    clock: Arc<dyn Clock>,
    inflight: InFlightRegistry,
    stats: StatsRecorder,
}

impl CoalescingCache {
    /// Starts a builder with the default [`CacheConfig`] and the system clock.
    pub fn builder(
        persistent: Arc<dyn PersistentTier>,
        upstream: Arc<dyn UpstreamFetcher>,
    ) -> CacheBuilder {
        CacheBuilder {
            persistent,
            upstream,
            config: CacheConfig::default(),
            clock: Arc::new(SystemClock),
        }
    }

    /// Builds an engine with the given configuration and the system clock.
    pub fn new(
        persistent: Arc<dyn PersistentTier>,
        upstream: Arc<dyn UpstreamFetcher>,
        config: CacheConfig,
    ) -> Result<Self, ConfigError> {
        Self::builder(persistent, upstream).config(config).build()
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.stats.snapshot()
    }

    pub fn is_in_flight(&self, key: &str) -> bool {
        self.inner.inflight.contains(key)
    }

    pub fn in_flight_count(&self) -> usize {
        self.inner.inflight.len()
    }

    /// Answers `key` from cache, a joined fetch, or the upstream.
    ///
    /// `request` is only sent when this call ends up owning a fetch: a cold
    /// miss or a background refresh. Fails only when the upstream fails and no
    /// last-known-good entry exists; every caller joined on that fetch then
    /// observes the same error.
    pub async fn fetch(
        &self,
        key: &str,
        request: UpstreamRequest,
    ) -> Result<CachedResponse, CacheError> {
        let inner = &self.inner;
        let now = inner.clock.now();

        if let Some(entry) = inner.memory.get(key).filter(|e| e.is_fresh_at(now)) {
            inner.stats.memory_hit();
            debug!(key = %key, "memory hit");
            return Ok(entry.to_response());
        }

        let persisted = inner.read_persistent(key).await;
        let freshness = persisted.as_ref().map(|entry| {
            Freshness::classify(
                entry.age_at(now),
                inner.config.fresh_ttl,
                inner.config.stale_ttl,
            )
        });

        if let (Some(entry), Some(Freshness::Fresh)) = (&persisted, freshness) {
            inner.stats.persistent_hit();
            debug!(key = %key, "persistent hit, warming memory");
            inner
                .memory
                .put(key, entry.rewarmed(now, inner.config.fresh_ttl));
            return Ok(entry.to_response());
        }

        let stale = persisted.filter(|_| freshness == Some(Freshness::Stale));

        if let Some((kind, pending)) = inner.inflight.join(key) {
            // A stale entry beats waiting on a refresh; a cold fetch is always joined.
            if kind == FetchKind::Cold || stale.is_none() {
                inner.stats.coalesced();
                debug!(key = %key, ?kind, "joining in-flight fetch");
                return inner.delivered(pending.await);
            }
        }

        if let Some(entry) = stale {
            inner.stats.stale_served();
            debug!(key = %key, age_ms = entry.age_at(now).as_millis() as u64, "serving stale");
            self.refresh_in_background(key, request);
            return Ok(entry.to_response().with_cache_status(CacheStatus::Stale));
        }

        let owner = Arc::clone(inner);
        let owned_key = key.to_owned();
        let registration = inner.inflight.register(key, FetchKind::Cold, move || {
            owner.load(owned_key, request)
        });
        if !registration.is_owner() {
            inner.stats.coalesced();
        }
        inner.delivered(registration.into_shared().await)
    }

    /// The persisted entry for `key` regardless of age, annotated `LKG` with
    /// its age, or `None` when nothing was ever persisted.
    pub async fn last_known_good(&self, key: &str) -> Option<CachedResponse> {
        let now = self.inner.clock.now();
        self.inner.last_known_good(key, now).await
    }

    fn refresh_in_background(&self, key: &str, request: UpstreamRequest) {
        let owner = Arc::clone(&self.inner);
        let owned_key = key.to_owned();
        let registration = self.inner.inflight.register(key, FetchKind::Refresh, move || {
            owner.load(owned_key, request)
        });
        if registration.is_owner() {
            self.inner.stats.refresh_started();
            debug!(key = %key, "background refresh started");
        } else {
            debug!(key = %key, "refresh already in flight");
        }
    }
}

impl Inner {
    /// Counts a fetch outcome handed to a caller. A refresh nobody awaits
    /// never passes through here.
    fn delivered(&self, outcome: FetchOutcome) -> FetchOutcome {
        if let Ok(resp) = &outcome {
            if resp.cache_status() == Some(CacheStatus::Lkg) {
                self.stats.lkg_served();
            }
        }
        outcome
    }

    /// One upstream attempt plus the caching and fallback policy around it.
    async fn load(self: Arc<Self>, key: String, request: UpstreamRequest) -> FetchOutcome {
        self.stats.upstream_call();
        let result = match self.config.upstream_timeout {
            Some(limit) => {
                match tokio::time::timeout(limit, self.upstream.fetch(request)).await {
                    Ok(result) => result,
                    Err(_) => Err(UpstreamError::Timeout(limit)),
                }
            }
            None => self.upstream.fetch(request).await,
        };
        let now = self.clock.now();

        match result {
            Ok(response) if is_server_error(response.status) && self.config.lkg_fallback => {
                warn!(key = %key, status = response.status, "upstream server error");
                if let Some(lkg) = self.last_known_good(&key, now).await {
                    info!(key = %key, "serving last-known-good in place of server error");
                    return Ok(lkg);
                }
                Ok(miss_response(response))
            }
            Ok(response) => Ok(self.store(&key, response, now).await),
            Err(e) => {
                self.stats.upstream_failure();
                if self.config.lkg_fallback {
                    if let Some(lkg) = self.last_known_good(&key, now).await {
                        warn!(key = %key, error = %e, "upstream failed, serving last-known-good");
                        return Ok(lkg);
                    }
                }
                warn!(key = %key, error = %e, "upstream failed with no fallback");
                Err(CacheError::Upstream {
                    key,
                    source: Arc::new(e),
                })
            }
        }
    }

    /// Writes a cacheable response to both tiers and returns it as `MISS`.
    async fn store(
        &self,
        key: &str,
        response: UpstreamResponse,
        now: DateTime<Utc>,
    ) -> CachedResponse {
        let status = response.status;
        let resp = miss_response(response);
        if !self.config.cacheable.is_cacheable(status) {
            debug!(key = %key, status, "response not cacheable");
            return resp;
        }

        let mut headers = resp.headers.clone();
        headers.remove(CACHE_STATUS_HEADER);
        let entry = CacheEntry::new(
            status,
            headers,
            resp.body.clone(),
            now,
            self.config.fresh_ttl,
        );
        if let Err(e) = self.persistent.put(key, &entry).await {
            warn!(key = %key, error = %e, "persistent tier write failed");
        }
        self.memory.put(key, entry);
        debug!(key = %key, status, "cached upstream response");
        resp
    }

    async fn last_known_good(&self, key: &str, now: DateTime<Utc>) -> Option<CachedResponse> {
        let entry = self.read_persistent(key).await?;
        Some(entry.to_response().with_lkg_age(entry.age_at(now)))
    }

    /// Persistent-tier read where a failure counts as a miss.
    async fn read_persistent(&self, key: &str) -> Option<CacheEntry> {
        match self.persistent.get(key).await {
            Ok(entry) => entry,
            Err(e) => {
                warn!(key = %key, error = %e, "persistent tier read failed, treating as miss");
                None
            }
        }
    }
}

/// Upstream answer as a `MISS` response with a parsed body.
///
/// Annotation headers the upstream may have sent are dropped so they can never
/// be mistaken for ours.
fn miss_response(response: UpstreamResponse) -> CachedResponse {
    let mut headers = response.headers;
    headers.remove(CACHE_AGE_HEADER);
    CachedResponse {
        status: response.status,
        headers,
        body: parse_body(&response.body),
    }
    .with_cache_status(CacheStatus::Miss)
}

/// Parses a JSON body; empty or malformed payloads become `Value::Null`.
fn parse_body(body: &Bytes) -> Value {
    if body.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(body).unwrap_or_else(|e| {
        debug!(error = %e, len = body.len(), "upstream body is not JSON, caching it as empty");
        Value::Null
    })
}

/// A [`CoalescingCache`] bound to a [`RequestStrategy`] chosen at construction.
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use herdcache::cache::{CoalescingCache, InMemoryStore, StrategyCache};
/// use herdcache::upstream::{FnFetcher, FnStrategy, UpstreamRequest, UpstreamResponse};
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let fetcher = FnFetcher::new(|_req| async { Ok(UpstreamResponse::new(200)) });
/// let cache = CoalescingCache::builder(Arc::new(InMemoryStore::new()), Arc::new(fetcher)).build()?;
/// let quotes = StrategyCache::new(
///     cache,
///     FnStrategy::new(
///         |symbol: &str| format!("quote:{symbol}"),
///         |symbol: &str| UpstreamRequest::get(format!("https://api.example.com/q/{symbol}")),
///     ),
/// );
/// let resp = quotes.fetch("ACME").await?;
/// # let _ = resp;
/// # Ok(())
/// # }
/// ```
pub struct StrategyCache<S> {
    cache: CoalescingCache,
    strategy: S,
}

impl<S: RequestStrategy> StrategyCache<S> {
    pub fn new(cache: CoalescingCache, strategy: S) -> Self {
        Self { cache, strategy }
    }

    pub fn cache(&self) -> &CoalescingCache {
        &self.cache
    }

    /// Derives the key and upstream request from `params`, then fetches.
    pub async fn fetch(&self, params: &S::Params) -> Result<CachedResponse, CacheError> {
        let key = self.strategy.cache_key(params);
        let request = self.strategy.upstream_request(params);
        self.cache.fetch(&key, request).await
    }
}
