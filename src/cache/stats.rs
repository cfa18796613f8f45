//! Counters describing how requests were answered.

use std::sync::atomic::{AtomicU64, Ordering};

/// Snapshot of engine activity since construction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Fresh hits served from the memory tier.
    pub memory_hits: u64,
    /// Fresh hits served from the persistent tier.
    pub persistent_hits: u64,
    /// Responses served stale while a refresh ran.
    pub stale_served: u64,
    /// Callers that joined a fetch already in flight.
    pub coalesced: u64,
    /// Upstream calls actually made.
    pub upstream_calls: u64,
    /// Background refreshes started.
    pub refreshes_started: u64,
    /// Last-known-good responses handed to callers.
    pub lkg_served: u64,
    /// Upstream calls that failed at the transport level.
    pub upstream_failures: u64,
}

impl CacheStats {
    /// Share of answers served without waiting on the upstream (0.0 to 1.0).
    ///
    /// Stale serves count as hits; coalesced joins do not.
    pub fn hit_rate(&self) -> f64 {
        let hits = self.memory_hits + self.persistent_hits + self.stale_served;
        let total = hits + self.coalesced + self.upstream_calls;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct StatsRecorder {
    memory_hits: AtomicU64,
    persistent_hits: AtomicU64,
    stale_served: AtomicU64,
    coalesced: AtomicU64,
    upstream_calls: AtomicU64,
    refreshes_started: AtomicU64,
    lkg_served: AtomicU64,
    upstream_failures: AtomicU64,
}

macro_rules! counter {
    ($($name:ident => $field:ident),* $(,)?) => {
        impl StatsRecorder {
            $(
                pub(crate) fn $name(&self) {
                    self.$field.fetch_add(1, Ordering::Relaxed);
                }
            )*
        }
    };
}

counter! {
    memory_hit => memory_hits,
    persistent_hit => persistent_hits,
    stale_served => stale_served,
    coalesced => coalesced,
    upstream_call => upstream_calls,
    refresh_started => refreshes_started,
    lkg_served => lkg_served,
    upstream_failure => upstream_failures,
}

impl StatsRecorder {
    pub(crate) fn snapshot(&self) -> CacheStats {
        CacheStats {
            memory_hits: self.memory_hits.load(Ordering::Relaxed),
            persistent_hits: self.persistent_hits.load(Ordering::Relaxed),
            stale_served: self.stale_served.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            upstream_calls: self.upstream_calls.load(Ordering::Relaxed),
            refreshes_started: self.refreshes_started.load(Ordering::Relaxed),
            lkg_served: self.lkg_served.load(Ordering::Relaxed),
            upstream_failures: self.upstream_failures.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hit_rate() {
        let stats = CacheStats {
            memory_hits: 6,
            stale_served: 2,
            upstream_calls: 1,
            coalesced: 1,
            ..Default::default()
        };
        assert!((stats.hit_rate() - 0.8).abs() < 0.001);
        assert!((CacheStats::default().hit_rate() - 0.0).abs() < 0.001);
    }

    #[test]
    fn recorder_snapshot() {
        let recorder = StatsRecorder::default();
        recorder.memory_hit();
        recorder.memory_hit();
        recorder.lkg_served();
        let snap = recorder.snapshot();
        assert_eq!(snap.memory_hits, 2);
        assert_eq!(snap.lkg_served, 1);
        assert_eq!(snap.upstream_calls, 0);
    }
}
