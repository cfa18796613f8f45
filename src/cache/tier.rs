//! The two cache tiers: an ephemeral memory map and a durable store.
//!
//! The persistent tier is the source of truth for staleness and last-known-good
//! decisions; the memory tier shadows it for the hot path and is lost on
//! restart. Neither tier evicts: entries are only ever superseded.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use thiserror::Error;

use super::entry::CacheEntry;

/// Errors raised by a persistent tier backend.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("LMDB error: {0}")]
    Lmdb(#[from] heed::Error),

    #[error("entry codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Durable key→entry store backing the cache.
///
/// Implementations must tolerate concurrent `get`/`put` on different keys.
/// The engine never writes the same key from two places at once, so no
/// transactional or multi-key operation is needed.
#[async_trait]
pub trait PersistentTier: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, StorageError>;

    async fn put(&self, key: &str, entry: &CacheEntry) -> Result<(), StorageError>;
}

/// Process-local key→entry map: the fastest read path.
///
/// The tier hands entries back regardless of age; the engine decides whether
/// an entry is still fresh.
#[derive(Debug, Default)]
pub struct MemoryTier {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl MemoryTier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<CacheEntry> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Stores `entry` unless the tier already holds one persisted later.
    pub fn put(&self, key: &str, entry: CacheEntry) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let superseded = entries
            .get(key)
            .is_some_and(|existing| existing.persisted_at > entry.persisted_at);
        if !superseded {
            entries.insert(key.to_owned(), entry);
        }
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A [`PersistentTier`] kept in process memory.
///
/// Useful for tests and single-process deployments that only need
/// last-known-good protection for the lifetime of the process.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl PersistentTier for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, StorageError> {
        Ok(self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned())
    }

    async fn put(&self, key: &str, entry: &CacheEntry) -> Result<(), StorageError> {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_owned(), entry.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::Headers;
    use chrono::{DateTime, Utc};
    use serde_json::json;
    use std::time::Duration;

    fn entry(persisted_ms: i64, body: serde_json::Value) -> CacheEntry {
        let at = DateTime::<Utc>::from_timestamp_millis(persisted_ms).unwrap();
        CacheEntry::new(200, Headers::new(), body, at, Duration::from_secs(10))
    }

    #[test]
    fn memory_tier_returns_expired_entries() {
        let tier = MemoryTier::new();
        tier.put("k", entry(0, json!(1)));
        // Freshness is the engine's call, not the tier's.
        assert!(tier.get("k").is_some());
        assert!(tier.get("other").is_none());
    }

    #[test]
    fn memory_tier_rejects_older_writes() {
        let tier = MemoryTier::new();
        tier.put("k", entry(5_000, json!("new")));
        tier.put("k", entry(1_000, json!("old")));
        assert_eq!(tier.get("k").unwrap().body, json!("new"));

        tier.put("k", entry(9_000, json!("newer")));
        assert_eq!(tier.get("k").unwrap().body, json!("newer"));
        assert_eq!(tier.len(), 1);
    }

    #[tokio::test]
    async fn in_memory_store_round_trip() {
        let store = InMemoryStore::new();
        assert!(store.get("k").await.unwrap().is_none());

        let e = entry(0, json!({"a": 1}));
        store.put("k", &e).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(e));
        assert_eq!(store.len(), 1);
    }
}
