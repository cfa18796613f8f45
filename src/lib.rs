//! # herdcache
//!
//! A per-key request-coalescing cache in front of a slow or flaky upstream.
//!
//! Concurrent requests for one key collapse into a single upstream call.
//! Answers are kept in a memory tier and a durable persistent tier, served
//! stale while a background refresh runs, and replayed as last-known-good
//! when the upstream fails.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use herdcache::{CoalescingCache, LmdbStore};
//! use herdcache::upstream::{FnFetcher, UpstreamRequest, UpstreamResponse};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = LmdbStore::open("/tmp/herdcache", 64)?;
//!     let fetcher = FnFetcher::new(|_req| async {
//!         Ok(UpstreamResponse::new(200).body(r#"{"price":12.5}"#))
//!     });
//!     let cache = CoalescingCache::builder(Arc::new(store), Arc::new(fetcher)).build()?;
//!
//!     let resp = cache
//!         .fetch("quote:ACME", UpstreamRequest::get("https://api.example.com/q/ACME"))
//!         .await?;
//!     println!("{} {:?} {}", resp.status, resp.cache_status(), resp.body);
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod http;
pub mod upstream;

// ── Convenience re-exports ────────────────────────────────────────────────────
pub use cache::{
    CacheConfig, CacheError, CacheStats, CacheStatus, CachedResponse, CoalescingCache,
    InMemoryStore, LmdbStore, StrategyCache,
};
pub use http::Headers;
pub use upstream::{UpstreamError, UpstreamFetcher, UpstreamRequest, UpstreamResponse};
