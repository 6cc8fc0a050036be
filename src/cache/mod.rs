// # Cache Module
//
// The multi-tier cache hierarchy of the buffer manager. The record-page
// caches hold frames and are swept by a background second-chance clock; the
// remaining tiers are bounded LRU caches with per-entry weighers and removal
// hooks, drained deterministically through `clean_up`.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::error::Result;

pub mod frame_cache;
pub mod keys;
pub mod sweeper;
pub mod tiers;
pub mod weighted;

pub use frame_cache::RecordPageCache;
pub use keys::{IndexLogKey, NamesCacheKey, PathSummaryKey, RevisionRootKey, ScopedKey};
pub use sweeper::{CacheSweeper, SweepScope, SweeperStats};
pub use tiers::{
    GenericPageCache, IndexNodeCache, NamesCache, PathSummaryCache, RevisionRootCache,
};
pub use weighted::{RemovalCause, WeightedCache};

// ============================================================================
// Generic Cache Contract
// ============================================================================

/// The contract shared by every cache tier.
///
/// `remove` transfers ownership of the value to the caller and never fires
/// removal hooks; `clear` and eviction do. Deferred maintenance (removal
/// hooks scheduled by eviction) is observed to have completed only after a
/// `clean_up` drain.
pub trait Cache<K, V>: Send + Sync
where
    K: Clone,
    V: Clone,
{
    fn get(&self, key: &K) -> Option<V>;

    /// Atomically get the mapped value or load-and-insert it on miss. The
    /// loader runs at most once per missing key.
    fn get_with_loader(&self, key: K, loader: &dyn Fn(&K) -> Result<V>) -> Result<V>;

    fn put(&self, key: K, value: V);

    /// Insert only if absent; returns the previously mapped value otherwise.
    fn put_if_absent(&self, key: K, value: V) -> Option<V>;

    fn put_all(&self, entries: Vec<(K, V)>) {
        for (key, value) in entries {
            self.put(key, value);
        }
    }

    fn get_all(&self, keys: &[K]) -> Vec<(K, V)> {
        keys.iter()
            .filter_map(|key| self.get(key).map(|value| (key.clone(), value)))
            .collect()
    }

    /// Remove the mapping and hand the value to the caller without firing
    /// removal hooks.
    fn remove(&self, key: &K) -> Option<V>;

    /// Remove every mapping, firing removal hooks.
    fn clear(&self);

    /// Shut the cache down; it stays empty afterwards.
    fn close(&self);

    /// Drain deferred maintenance synchronously.
    fn clean_up(&self) {}
}

// ============================================================================
// Statistics
// ============================================================================

/// Atomic hit/miss counters shared by all cache tiers.
#[derive(Default)]
pub struct CacheStatsRecorder {
    hits: AtomicU64,
    misses: AtomicU64,
    insertions: AtomicU64,
    evictions: AtomicU64,
    removals: AtomicU64,
}

impl CacheStatsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline(always)]
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn record_insertion(&self) {
        self.insertions.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn record_removal(&self) {
        self.removals.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, entries: usize, weight: usize) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            insertions: self.insertions.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            removals: self.removals.load(Ordering::Relaxed),
            entries: entries as u64,
            weight: weight as u64,
        }
    }
}

/// Point-in-time cache statistics
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub insertions: u64,
    pub evictions: u64,
    pub removals: u64,
    pub entries: u64,
    pub weight: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.hits + self.misses;
        if lookups == 0 {
            0.0
        } else {
            self.hits as f64 / lookups as f64
        }
    }
}
