// # Weight-Bounded Cache
//
// Bounded concurrent cache with a per-entry weigher, LRU victim order and
// removal hooks. Hooks for evicted and invalidated entries are queued and
// run when the queue is drained: opportunistically after mutations and
// deterministically in `clean_up`. Callers that are about to close a value
// that might still sit in the queue (the intent log does) drain first.

use std::hash::Hash;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use crossbeam::queue::SegQueue;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::cache::{Cache, CacheStats, CacheStatsRecorder};
use crate::error::Result;

/// Why a removal hook fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalCause {
    /// Capacity eviction
    Evicted,
    /// Explicit clear or key-scoped invalidation
    Invalidated,
    /// Overwritten by a newer value
    Replaced,
}

pub type Weigher<K, V> = Box<dyn Fn(&K, &V) -> usize + Send + Sync>;
pub type RemovalListener<K, V> = Box<dyn Fn(&K, &V, RemovalCause) + Send + Sync>;

struct CacheEntry<V> {
    value: V,
    weight: usize,
    last_access: u64,
}

/// Bounded cache keyed by small copyable records.
pub struct WeightedCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    map: DashMap<K, CacheEntry<V>>,
    max_weight: usize,
    weigher: Weigher<K, V>,
    listener: Option<RemovalListener<K, V>>,
    current_weight: AtomicUsize,
    tick: AtomicU64,
    pending: SegQueue<(K, V, RemovalCause)>,
    stats: CacheStatsRecorder,
    closed: AtomicBool,
}

impl<K, V> WeightedCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Entry-bounded cache: every entry weighs one.
    pub fn new(max_entries: usize) -> Self {
        Self::with_weigher(max_entries, |_, _| 1)
    }

    /// Weight-bounded cache with a custom per-entry weigher.
    pub fn with_weigher(
        max_weight: usize,
        weigher: impl Fn(&K, &V) -> usize + Send + Sync + 'static,
    ) -> Self {
        assert!(max_weight > 0, "cache capacity must be > 0");
        Self {
            map: DashMap::new(),
            max_weight,
            weigher: Box::new(weigher),
            listener: None,
            current_weight: AtomicUsize::new(0),
            tick: AtomicU64::new(0),
            pending: SegQueue::new(),
            stats: CacheStatsRecorder::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Attach a removal hook fired for evicted, invalidated and replaced
    /// entries (never for `remove`, which transfers ownership).
    pub fn with_removal_listener(
        mut self,
        listener: impl Fn(&K, &V, RemovalCause) + Send + Sync + 'static,
    ) -> Self {
        self.listener = Some(Box::new(listener));
        self
    }

    #[inline(always)]
    fn next_tick(&self) -> u64 {
        self.tick.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Weight currently accounted to live entries.
    pub fn weight(&self) -> usize {
        self.current_weight.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.snapshot(self.map.len(), self.weight())
    }

    /// Keys currently mapped; raw access for bulk key-scoped invalidation.
    pub fn keys(&self) -> Vec<K> {
        self.map.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Remove every entry whose key matches, queueing removal hooks.
    pub fn invalidate_matching(&self, predicate: &dyn Fn(&K) -> bool) -> usize {
        let matching: Vec<K> = self
            .map
            .iter()
            .filter(|entry| predicate(entry.key()))
            .map(|entry| entry.key().clone())
            .collect();

        let mut invalidated = 0;
        for key in matching {
            if let Some((key, entry)) = self.map.remove(&key) {
                self.current_weight.fetch_sub(entry.weight, Ordering::AcqRel);
                self.pending.push((key, entry.value, RemovalCause::Invalidated));
                self.stats.record_eviction();
                invalidated += 1;
            }
        }
        invalidated
    }

    fn evict_if_needed(&self) {
        let mut attempts = 0;
        while self.current_weight.load(Ordering::Acquire) > self.max_weight {
            attempts += 1;
            if attempts > self.map.len() * 2 + 10 {
                break;
            }

            // LRU victim: the entry with the smallest access tick.
            let mut victim: Option<(K, u64)> = None;
            for entry in self.map.iter() {
                let tick = entry.last_access;
                if victim.as_ref().map(|(_, t)| tick < *t).unwrap_or(true) {
                    victim = Some((entry.key().clone(), tick));
                }
            }
            let Some((key, tick)) = victim else {
                break;
            };

            // Only evict if the entry has not been touched since we chose it.
            if let Some((key, entry)) = self
                .map
                .remove_if(&key, |_, entry| entry.last_access == tick)
            {
                self.current_weight.fetch_sub(entry.weight, Ordering::AcqRel);
                self.pending.push((key, entry.value, RemovalCause::Evicted));
                self.stats.record_eviction();
            }
        }
    }

    fn drain_pending(&self) {
        while let Some((key, value, cause)) = self.pending.pop() {
            if let Some(ref listener) = self.listener {
                listener(&key, &value, cause);
            }
        }
    }
}

impl<K, V> Cache<K, V> for WeightedCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn get(&self, key: &K) -> Option<V> {
        match self.map.get_mut(key) {
            Some(mut entry) => {
                entry.last_access = self.next_tick();
                self.stats.record_hit();
                Some(entry.value.clone())
            }
            None => {
                self.stats.record_miss();
                None
            }
        }
    }

    fn get_with_loader(&self, key: K, loader: &dyn Fn(&K) -> Result<V>) -> Result<V> {
        let tick = self.next_tick();
        let loaded = match self.map.entry(key) {
            Entry::Occupied(mut occupied) => {
                occupied.get_mut().last_access = tick;
                self.stats.record_hit();
                return Ok(occupied.get().value.clone());
            }
            Entry::Vacant(vacant) => {
                self.stats.record_miss();
                let value = loader(vacant.key())?;
                let weight = (self.weigher)(vacant.key(), &value);
                vacant.insert(CacheEntry {
                    value: value.clone(),
                    weight,
                    last_access: tick,
                });
                self.current_weight.fetch_add(weight, Ordering::AcqRel);
                self.stats.record_insertion();
                value
            }
        };
        self.evict_if_needed();
        Ok(loaded)
    }

    fn put(&self, key: K, value: V) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        let weight = (self.weigher)(&key, &value);
        let tick = self.next_tick();

        match self.map.entry(key) {
            Entry::Occupied(mut occupied) => {
                let replaced = std::mem::replace(
                    occupied.get_mut(),
                    CacheEntry {
                        value,
                        weight,
                        last_access: tick,
                    },
                );
                self.current_weight
                    .fetch_sub(replaced.weight, Ordering::AcqRel);
                self.current_weight.fetch_add(weight, Ordering::AcqRel);
                self.pending.push((
                    occupied.key().clone(),
                    replaced.value,
                    RemovalCause::Replaced,
                ));
            }
            Entry::Vacant(vacant) => {
                vacant.insert(CacheEntry {
                    value,
                    weight,
                    last_access: tick,
                });
                self.current_weight.fetch_add(weight, Ordering::AcqRel);
                self.stats.record_insertion();
            }
        }
        self.evict_if_needed();
    }

    fn put_if_absent(&self, key: K, value: V) -> Option<V> {
        if self.closed.load(Ordering::Acquire) {
            return None;
        }
        let weight = (self.weigher)(&key, &value);
        let tick = self.next_tick();

        let existing = match self.map.entry(key) {
            Entry::Occupied(mut occupied) => {
                occupied.get_mut().last_access = tick;
                Some(occupied.get().value.clone())
            }
            Entry::Vacant(vacant) => {
                vacant.insert(CacheEntry {
                    value,
                    weight,
                    last_access: tick,
                });
                self.current_weight.fetch_add(weight, Ordering::AcqRel);
                self.stats.record_insertion();
                None
            }
        };
        if existing.is_none() {
            self.evict_if_needed();
        }
        existing
    }

    fn remove(&self, key: &K) -> Option<V> {
        self.map.remove(key).map(|(_, entry)| {
            self.current_weight.fetch_sub(entry.weight, Ordering::AcqRel);
            self.stats.record_removal();
            entry.value
        })
    }

    fn clear(&self) {
        self.invalidate_matching(&|_| true);
        self.drain_pending();
    }

    fn close(&self) {
        self.clear();
        self.closed.store(true, Ordering::Release);
    }

    fn clean_up(&self) {
        self.drain_pending();
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[test]
    fn test_basic_get_put() {
        let cache: WeightedCache<u32, String> = WeightedCache::new(10);

        cache.put(1, "one".to_string());
        assert_eq!(cache.get(&1), Some("one".to_string()));
        assert_eq!(cache.get(&2), None);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn test_lru_eviction_order() {
        let cache: WeightedCache<u32, u32> = WeightedCache::new(3);

        cache.put(1, 1);
        cache.put(2, 2);
        cache.put(3, 3);

        // Touch 1 so that 2 becomes the LRU victim.
        cache.get(&1);
        cache.put(4, 4);
        cache.clean_up();

        assert!(cache.get(&2).is_none());
        assert!(cache.get(&1).is_some());
        assert!(cache.get(&3).is_some());
        assert!(cache.get(&4).is_some());
    }

    #[test]
    fn test_weigher_bounds_total_weight() {
        let cache: WeightedCache<u32, Vec<u8>> =
            WeightedCache::with_weigher(100, |_, value: &Vec<u8>| value.len());

        cache.put(1, vec![0u8; 60]);
        cache.put(2, vec![0u8; 60]);

        assert!(cache.weight() <= 100);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_removal_listener_fires_after_drain() {
        let fired = Arc::new(AtomicUsize::new(0));
        let observed = fired.clone();
        let cache: WeightedCache<u32, u32> = WeightedCache::new(1)
            .with_removal_listener(move |_, _, cause| {
                assert_eq!(cause, RemovalCause::Evicted);
                observed.fetch_add(1, Ordering::SeqCst);
            });

        cache.put(1, 1);
        cache.put(2, 2);

        cache.clean_up();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_remove_transfers_ownership_silently() {
        let fired = Arc::new(AtomicUsize::new(0));
        let observed = fired.clone();
        let cache: WeightedCache<u32, u32> = WeightedCache::new(10)
            .with_removal_listener(move |_, _, _| {
                observed.fetch_add(1, Ordering::SeqCst);
            });

        cache.put(1, 1);
        assert_eq!(cache.remove(&1), Some(1));
        cache.clean_up();

        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert_eq!(cache.weight(), 0);
    }

    #[test]
    fn test_put_if_absent_keeps_existing() {
        let cache: WeightedCache<u32, u32> = WeightedCache::new(10);

        assert_eq!(cache.put_if_absent(1, 100), None);
        assert_eq!(cache.put_if_absent(1, 200), Some(100));
        assert_eq!(cache.get(&1), Some(100));
    }

    #[test]
    fn test_get_with_loader_loads_once() {
        let cache: WeightedCache<u32, u32> = WeightedCache::new(10);
        let loads = AtomicUsize::new(0);

        let loader = |key: &u32| -> Result<u32> {
            loads.fetch_add(1, Ordering::SeqCst);
            Ok(*key * 10)
        };
        assert_eq!(cache.get_with_loader(1, &loader).unwrap(), 10);
        assert_eq!(cache.get_with_loader(1, &loader).unwrap(), 10);
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_clear_invalidates_everything() {
        let fired = Arc::new(AtomicUsize::new(0));
        let observed = fired.clone();
        let cache: WeightedCache<u32, u32> = WeightedCache::new(10)
            .with_removal_listener(move |_, _, cause| {
                assert_eq!(cause, RemovalCause::Invalidated);
                observed.fetch_add(1, Ordering::SeqCst);
            });

        cache.put(1, 1);
        cache.put(2, 2);
        cache.clear();

        assert!(cache.is_empty());
        assert_eq!(cache.weight(), 0);
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_invalidate_matching_is_selective() {
        let cache: WeightedCache<u32, u32> = WeightedCache::new(10);
        for key in 0..6 {
            cache.put(key, key);
        }

        let removed = cache.invalidate_matching(&|key| key % 2 == 0);
        cache.clean_up();

        assert_eq!(removed, 3);
        assert_eq!(cache.len(), 3);
        assert!(cache.get(&1).is_some());
        assert!(cache.get(&2).is_none());
    }

    #[test]
    fn test_put_all_and_get_all() {
        let cache: WeightedCache<u32, u32> = WeightedCache::new(10);
        cache.put_all(vec![(1, 10), (2, 20), (3, 30)]);

        let found = cache.get_all(&[1, 3, 5]);
        assert_eq!(found, vec![(1, 10), (3, 30)]);
    }
}
