//! Request-coalescing, two-tier response cache.
//!
//! [`CoalescingCache::fetch`] answers from the fastest tier that holds a fresh
//! entry, collapses concurrent misses for one key into a single upstream call,
//! serves stale entries while refreshing them in the background, and falls
//! back to the last-known-good entry when the upstream is down.
//!
//! ## Lookup order
//!
//! 1. Memory tier, fresh → returned as is.
//! 2. Persistent tier, fresh → returned and copied into memory.
//! 3. Fetch already in flight → joined (a background refresh is only joined
//!    when there is no stale entry to serve instead).
//! 4. Persistent tier, stale → returned as `STALE`; one background refresh.
//! 5. Otherwise a cold fetch, registered so later callers join it.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use herdcache::cache::{CoalescingCache, InMemoryStore};
//! use herdcache::upstream::{FnFetcher, UpstreamRequest, UpstreamResponse};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let fetcher = FnFetcher::new(|_req| async {
//!     Ok(UpstreamResponse::new(200).body(r#"{"price":12.5}"#))
//! });
//! let cache = CoalescingCache::builder(Arc::new(InMemoryStore::new()), Arc::new(fetcher))
//!     .build()?;
//!
//! let resp = cache
//!     .fetch("quote:ACME", UpstreamRequest::get("https://api.example.com/q/ACME"))
//!     .await?;
//! assert_eq!(resp.status, 200);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use thiserror::Error;

use crate::upstream::UpstreamError;

pub mod clock;
pub mod config;
pub mod engine;
pub mod entry;
pub mod inflight;
pub mod lmdb;
pub mod stats;
pub mod tier;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{CacheConfig, CacheablePolicy, ConfigError};
pub use engine::{CacheBuilder, CoalescingCache, StrategyCache};
pub use entry::{CacheEntry, CacheStatus, CachedResponse, Freshness};
pub use inflight::{FetchKind, FetchOutcome, InFlightRegistry, Registration, SharedFetch};
pub use lmdb::LmdbStore;
pub use stats::CacheStats;
pub use tier::{InMemoryStore, MemoryTier, PersistentTier, StorageError};

/// Terminal errors from [`CoalescingCache::fetch`].
///
/// Cloneable so that every caller joined on one in-flight fetch receives the
/// same error.
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    /// The upstream failed and no last-known-good entry could stand in.
    #[error("upstream fetch for `{key}` failed with no fallback: {source}")]
    Upstream {
        key: String,
        #[source]
        source: Arc<UpstreamError>,
    },

    /// The task running the fetch ended without producing a result.
    #[error("in-flight fetch for `{key}` aborted: {reason}")]
    Aborted { key: String, reason: String },
}

impl CacheError {
    /// The cache key the failed fetch was for.
    pub fn key(&self) -> &str {
        match self {
            Self::Upstream { key, .. } | Self::Aborted { key, .. } => key,
        }
    }
}
