//! LMDB-backed persistent tier.
//!
//! Uses the heed crate (Rust bindings for LMDB) as a memory-mapped, durable
//! key-value store. Each entry is stored JSON-encoded under the raw bytes of
//! its cache key, so entries survive process restarts and can be inspected
//! with standard LMDB tooling.
//!
//! # Thread Safety
//!
//! LMDB provides ACID transactions: `get` runs in a read transaction, `put`
//! in a write transaction. LMDB serializes writers internally, which is all
//! the engine needs since it never writes one key from two places at once.

use std::path::Path;

use async_trait::async_trait;
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};
use tracing::debug;

use super::entry::CacheEntry;
use super::tier::{PersistentTier, StorageError};

/// Durable [`PersistentTier`] on an LMDB environment.
///
/// # Example
///
/// ```ignore
/// let store = LmdbStore::open("/var/lib/herdcache", 256)?;
/// let cache = CoalescingCache::builder(Arc::new(store), Arc::new(fetcher)).build()?;
/// ```
pub struct LmdbStore {
    env: Env,
    db: Database<Bytes, Bytes>,
}

impl LmdbStore {
    /// Opens (creating if needed) an LMDB environment at `path`.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory where LMDB files will be stored
    /// * `max_size_mb` - Maximum size of the memory map in megabytes
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the environment
    /// or database cannot be opened.
    pub fn open<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, StorageError> {
        std::fs::create_dir_all(&path)?;

        // SAFETY: the environment is opened once per store and the directory is
        // owned by this process; no other mapping of the same files is created.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(1)
                .open(path.as_ref())
        }?;

        let mut wtxn = env.write_txn()?;
        let db: Database<Bytes, Bytes> = env.create_database(&mut wtxn, None)?;
        wtxn.commit()?;

        debug!(path = %path.as_ref().display(), "opened LMDB store");
        Ok(Self { env, db })
    }

    /// Number of entries in the store.
    pub fn len(&self) -> Result<u64, StorageError> {
        let rtxn = self.env.read_txn()?;
        Ok(self.db.len(&rtxn)?)
    }

    pub fn is_empty(&self) -> Result<bool, StorageError> {
        Ok(self.len()? == 0)
    }
}

#[async_trait]
impl PersistentTier for LmdbStore {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, StorageError> {
        let rtxn = self.env.read_txn()?;
        match self.db.get(&rtxn, key.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(bytes)?)),
            None => Ok(None),
        }
    }

    async fn put(&self, key: &str, entry: &CacheEntry) -> Result<(), StorageError> {
        let bytes = serde_json::to_vec(entry)?;
        let mut wtxn = self.env.write_txn()?;
        self.db.put(&mut wtxn, key.as_bytes(), &bytes)?;
        wtxn.commit()?;
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
    use tempfile::TempDir;

    fn create_test_store() -> (LmdbStore, TempDir) {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        let store = LmdbStore::open(temp_dir.path(), 10).expect("store creation should succeed");
        (store, temp_dir)
    }

    fn entry(persisted_ms: i64) -> CacheEntry {
        let mut headers = Headers::new();
        headers.insert("Content-Type", "application/json");
        CacheEntry::new(
            200,
            headers,
            json!({"quote": {"symbol": "ACME", "price": 12.5}}),
            DateTime::<Utc>::from_timestamp_millis(persisted_ms).unwrap(),
            Duration::from_secs(10),
        )
    }

    #[tokio::test]
    async fn missing_key_is_none() {
        let (store, _dir) = create_test_store();
        assert!(store.get("nope").await.unwrap().is_none());
        assert!(store.is_empty().unwrap());
    }

    #[tokio::test]
    async fn put_then_get() {
        let (store, _dir) = create_test_store();
        let e = entry(1_000);
        store.put("quote:ACME", &e).await.unwrap();

        assert_eq!(store.get("quote:ACME").await.unwrap(), Some(e));
        assert_eq!(store.len().unwrap(), 1);
    }

    #[tokio::test]
    async fn put_supersedes_previous_entry() {
        let (store, _dir) = create_test_store();
        store.put("k", &entry(1_000)).await.unwrap();
        store.put("k", &entry(2_000)).await.unwrap();

        let got = store.get("k").await.unwrap().unwrap();
        assert_eq!(got.persisted_at.timestamp_millis(), 2_000);
        assert_eq!(store.len().unwrap(), 1);
    }

    #[tokio::test]
    async fn corrupt_value_surfaces_codec_error() {
        let (store, _dir) = create_test_store();
        {
            let mut wtxn = store.env.write_txn().unwrap();
            store.db.put(&mut wtxn, b"bad", b"not json").unwrap();
            wtxn.commit().unwrap();
        }
        assert!(matches!(
            store.get("bad").await,
            Err(StorageError::Codec(_))
        ));
    }
}
