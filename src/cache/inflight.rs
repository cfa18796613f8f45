//! Single-flight registry: at most one upstream fetch per key.
//!
//! Every registered operation is spawned onto the Tokio runtime and runs to
//! completion whether or not anyone is still waiting on it. Callers get a
//! [`SharedFetch`] handle; any number of handles for the same key resolve to
//! the same outcome.
//!
//! Check-then-register happens under one lock with no `.await` in between, so
//! two racing callers for a key can never both become the owner.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use tokio::sync::oneshot;
use tracing::{debug, error};

use super::CacheError;
use super::entry::CachedResponse;

/// Result every joiner of one in-flight fetch observes.
pub type FetchOutcome = Result<CachedResponse, CacheError>;

/// A cloneable handle on the eventual outcome of an in-flight fetch.
pub type SharedFetch = Shared<BoxFuture<'static, FetchOutcome>>;

/// Why an in-flight fetch was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchKind {
    /// Nothing servable was cached; callers are waiting on the result.
    Cold,
    /// A stale entry was served; the fetch only replaces it.
    Refresh,
}

/// Outcome of [`InFlightRegistry::register`].
pub enum Registration {
    /// The caller's operation was spawned and now owns the key.
    Owner(SharedFetch),
    /// Another fetch already owned the key; the caller's operation was dropped.
    Joined(FetchKind, SharedFetch),
}

impl Registration {
    pub fn into_shared(self) -> SharedFetch {
        match self {
            Self::Owner(shared) | Self::Joined(_, shared) => shared,
        }
    }

    pub fn is_owner(&self) -> bool {
        matches!(self, Self::Owner(_))
    }
}

struct Slot {
    id: u64,
    kind: FetchKind,
    fetch: SharedFetch,
}

/// Key → in-flight fetch table. Clones share the same table.
#[derive(Clone, Default)]
pub struct InFlightRegistry {
    slots: Arc<Mutex<HashMap<String, Slot>>>,
    next_id: Arc<AtomicU64>,
}

impl InFlightRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the fetch in flight for `key`, if any.
    pub fn join(&self, key: &str) -> Option<(FetchKind, SharedFetch)> {
        self.lock()
            .get(key)
            .map(|slot| (slot.kind, slot.fetch.clone()))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lock().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Joins the fetch in flight for `key`, or spawns `operation()` as the new
    /// owner when there is none.
    ///
    /// `operation` is only invoked when the caller becomes the owner. The slot
    /// is removed when the spawned task finishes, including on panic, in which
    /// case joiners observe [`CacheError::Aborted`]. The registry lock is
    /// released before the task is spawned.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn register<F, Fut>(&self, key: &str, kind: FetchKind, operation: F) -> Registration
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = FetchOutcome> + Send + 'static,
    {
        let mut slots = self.lock();
        if let Some(slot) = slots.get(key) {
            return Registration::Joined(slot.kind, slot.fetch.clone());
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel::<FetchOutcome>();
        let owned_key = key.to_owned();
        let fetch = async move {
            match rx.await {
                Ok(outcome) => outcome,
                Err(_) => {
                    error!(key = %owned_key, "in-flight fetch ended without a result");
                    Err(CacheError::Aborted {
                        key: owned_key,
                        reason: "fetch task ended without producing a result".into(),
                    })
                }
            }
        }
        .boxed()
        .shared();

        slots.insert(
            key.to_owned(),
            Slot {
                id,
                kind,
                fetch: fetch.clone(),
            },
        );
        drop(slots);
        debug!(key = %key, ?kind, "registered in-flight fetch");

        // The slot exists before the task does, so the guard can never remove
        // it ahead of insertion.
        let guard = SettleGuard {
            registry: self.clone(),
            key: key.to_owned(),
            id,
        };
        let future = operation();
        tokio::spawn(async move {
            let _guard = guard;
            let outcome = future.await;
            let _ = tx.send(outcome);
        });

        Registration::Owner(fetch)
    }

    fn settle(&self, key: &str, id: u64) {
        let mut slots = self.lock();
        if slots.get(key).is_some_and(|slot| slot.id == id) {
            slots.remove(key);
            debug!(key = %key, "in-flight fetch settled");
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct SettleGuard {
    registry: InFlightRegistry,
    key: String,
    id: u64,
}

impl Drop for SettleGuard {
    fn drop(&mut self) {
        self.registry.settle(&self.key, self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::Headers;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn response(n: i64) -> CachedResponse {
        CachedResponse {
            status: 200,
            headers: Headers::new(),
            body: json!(n),
        }
    }

    async fn wait_settled(registry: &InFlightRegistry, key: &str) {
        while registry.contains(key) {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    #[tokio::test]
    async fn second_register_joins_first() {
        let registry = InFlightRegistry::new();
        let (tx, rx) = oneshot::channel::<()>();

        let first = registry.register("k", FetchKind::Cold, || async move {
            let _ = rx.await;
            Ok(response(1))
        });
        assert!(first.is_owner());

        let invoked = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&invoked);
        let second = registry.register("k", FetchKind::Cold, move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok(response(2)) }
        });
        assert!(matches!(second, Registration::Joined(FetchKind::Cold, _)));
        assert_eq!(invoked.load(Ordering::SeqCst), 0);

        tx.send(()).unwrap();
        let a = first.into_shared().await.unwrap();
        let b = second.into_shared().await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.body, json!(1));
    }

    #[tokio::test]
    async fn slot_removed_after_success_and_failure() {
        let registry = InFlightRegistry::new();

        let ok = registry.register("ok", FetchKind::Cold, || async { Ok(response(1)) });
        ok.into_shared().await.unwrap();
        wait_settled(&registry, "ok").await;

        let failed = registry.register("err", FetchKind::Refresh, || async {
            Err(CacheError::Aborted {
                key: "err".into(),
                reason: "boom".into(),
            })
        });
        assert!(failed.into_shared().await.is_err());
        wait_settled(&registry, "err").await;

        assert!(registry.is_empty());
        // A new owner may register once the old one is gone.
        assert!(registry
            .register("ok", FetchKind::Cold, || async { Ok(response(3)) })
            .is_owner());
    }

    #[tokio::test]
    async fn runs_to_completion_without_waiters() {
        let registry = InFlightRegistry::new();
        let (tx, rx) = oneshot::channel();

        let reg = registry.register("k", FetchKind::Refresh, || async move {
            let _ = tx.send(());
            Ok(response(1))
        });
        drop(reg);

        rx.await.expect("operation ran although nobody awaited it");
        wait_settled(&registry, "k").await;
    }

    #[tokio::test]
    async fn panic_settles_slot_and_aborts_joiners() {
        let registry = InFlightRegistry::new();
        let reg = registry.register("k", FetchKind::Cold, || async {
            if true {
                panic!("upstream adapter bug");
            }
            Ok(response(0))
        });

        let err = reg.into_shared().await.unwrap_err();
        assert!(matches!(err, CacheError::Aborted { .. }));
        wait_settled(&registry, "k").await;
    }

    #[tokio::test]
    async fn join_reports_kind() {
        let registry = InFlightRegistry::new();
        let (tx, rx) = oneshot::channel::<()>();
        let _reg = registry.register("k", FetchKind::Refresh, || async move {
            let _ = rx.await;
            Ok(response(1))
        });

        let (kind, _) = registry.join("k").unwrap();
        assert_eq!(kind, FetchKind::Refresh);
        assert!(registry.join("other").is_none());
        drop(tx);
    }
}
