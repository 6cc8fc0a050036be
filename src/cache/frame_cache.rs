// # Record-Page Cache
//
// Sharded cache mapping page references to page frames. Each shard is a
// concurrent map with its own clock hand and eviction mutex; per-key
// atomicity comes from the map's entry primitive, so `get_and_guard` and the
// sweeper's eviction step cannot interleave on the same key.
//
// `remove` is the only operation that transfers a frame out of the cache
// without closing it; that is how the transaction intent log adopts dirty
// pages.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;

use crate::buffer::loader::PageLoader;
use crate::cache::{Cache, CacheStats, CacheStatsRecorder};
use crate::error::Result;
use crate::page::frame::KeyValueLeafPage;
use crate::page::guard::PageGuard;
use crate::page::reference::{PageRefKey, PageReference};

/// One mapped frame together with the reference it was inserted under; the
/// sweeper needs the reference to null its swizzled slot on eviction.
#[derive(Clone)]
pub struct FrameSlot {
    pub reference: Arc<PageReference>,
    pub frame: Arc<KeyValueLeafPage>,
}

pub(crate) struct FrameShard {
    pub(crate) map: DashMap<PageRefKey, FrameSlot>,
    pub(crate) clock_hand: AtomicUsize,
    pub(crate) evict_lock: Mutex<()>,
}

impl FrameShard {
    fn new() -> Self {
        Self {
            map: DashMap::new(),
            clock_hand: AtomicUsize::new(0),
            evict_lock: Mutex::new(()),
        }
    }
}

/// Sharded map of page reference -> page frame with clock-order eviction.
pub struct RecordPageCache {
    shards: Vec<FrameShard>,
    stats: CacheStatsRecorder,
    leaked_guards: AtomicU64,
    closed: AtomicBool,
}

impl RecordPageCache {
    pub fn new(shard_count: usize) -> Self {
        let shard_count = shard_count.max(1);
        Self {
            shards: (0..shard_count).map(|_| FrameShard::new()).collect(),
            stats: CacheStatsRecorder::new(),
            leaked_guards: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// One shard per core by default.
    pub fn with_default_shards() -> Self {
        Self::new(num_cpus::get())
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    pub(crate) fn shards(&self) -> &[FrameShard] {
        &self.shards
    }

    fn shard_for(&self, key: &PageRefKey) -> &FrameShard {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % self.shards.len()]
    }

    /// Look the frame up and mark it hot.
    pub fn get(&self, reference: &PageReference) -> Option<Arc<KeyValueLeafPage>> {
        let key = reference.cache_key();
        let shard = self.shard_for(&key);

        let frame = match shard.map.get(&key) {
            Some(slot) => slot.frame.clone(),
            None => {
                self.stats.record_miss();
                return None;
            }
        };
        if frame.is_closed() {
            self.stats.record_miss();
            return None;
        }
        frame.mark_accessed();
        self.stats.record_hit();
        Some(frame)
    }

    /// Atomically look the frame up, mark it hot and fix a guard on it.
    ///
    /// The lookup holds the per-key map lock across the guard acquisition,
    /// so a concurrent sweep either runs before (and the lookup misses) or
    /// after (and observes the guard). Absent if the slot is empty or the
    /// frame is closed.
    pub fn get_and_guard(&self, reference: &Arc<PageReference>) -> Option<PageGuard> {
        let key = reference.cache_key();
        let shard = self.shard_for(&key);

        let slot_ref = match shard.map.get(&key) {
            Some(slot) => slot,
            None => {
                self.stats.record_miss();
                return None;
            }
        };
        let slot = slot_ref.value();
        if slot.frame.is_closed() {
            drop(slot_ref);
            self.stats.record_miss();
            return None;
        }
        slot.frame.mark_accessed();
        let guard = PageGuard::fix(reference.clone(), slot.frame.clone());
        drop(slot_ref);
        self.stats.record_hit();
        Some(guard)
    }

    /// Per-key atomic get-or-load. The loader runs only on miss; a hit is
    /// marked hot like any other lookup.
    pub fn compute(
        &self,
        reference: &Arc<PageReference>,
        loader: impl FnOnce() -> Result<Arc<KeyValueLeafPage>>,
    ) -> Result<Arc<KeyValueLeafPage>> {
        let key = reference.cache_key();
        let shard = self.shard_for(&key);

        match shard.map.entry(key) {
            Entry::Occupied(occupied) => {
                let frame = occupied.get().frame.clone();
                frame.mark_accessed();
                self.stats.record_hit();
                Ok(frame)
            }
            Entry::Vacant(vacant) => {
                self.stats.record_miss();
                let frame = loader()?;
                frame.mark_accessed();
                reference.swizzle(&frame);
                vacant.insert(FrameSlot {
                    reference: reference.clone(),
                    frame: frame.clone(),
                });
                self.stats.record_insertion();
                Ok(frame)
            }
        }
    }

    /// Look the frame up or reconstruct it through the page loader.
    ///
    /// The loader is the external collaborator that rebuilds a page from its
    /// reference (allocating segments as it goes); it runs only on miss,
    /// under the same per-key atomicity as any other compute.
    pub fn get_or_load(
        &self,
        reference: &Arc<PageReference>,
        loader: &dyn PageLoader,
    ) -> Result<Arc<KeyValueLeafPage>> {
        self.compute(reference, || loader.load(reference))
    }

    /// Insert and mark hot.
    pub fn put(&self, reference: Arc<PageReference>, frame: Arc<KeyValueLeafPage>) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        let key = reference.cache_key();
        let shard = self.shard_for(&key);

        frame.mark_accessed();
        reference.swizzle(&frame);
        let replaced = shard.map.insert(key, FrameSlot { reference, frame });
        self.stats.record_insertion();

        if let Some(old) = replaced {
            // The displaced frame left the cache without an ownership
            // transfer; close it unless the caller re-inserted it.
            let new = shard.map.get(&key).map(|slot| slot.frame.clone());
            if new
                .map(|frame| !Arc::ptr_eq(&frame, &old.frame))
                .unwrap_or(true)
            {
                old.frame.close();
            }
        }
    }

    /// Insert only if absent; returns the already-mapped frame otherwise.
    pub fn put_if_absent(
        &self,
        reference: Arc<PageReference>,
        frame: Arc<KeyValueLeafPage>,
    ) -> Option<Arc<KeyValueLeafPage>> {
        if self.closed.load(Ordering::Acquire) {
            return None;
        }
        let key = reference.cache_key();
        let shard = self.shard_for(&key);

        match shard.map.entry(key) {
            Entry::Occupied(occupied) => {
                let existing = occupied.get().frame.clone();
                existing.mark_accessed();
                Some(existing)
            }
            Entry::Vacant(vacant) => {
                frame.mark_accessed();
                reference.swizzle(&frame);
                vacant.insert(FrameSlot { reference, frame });
                self.stats.record_insertion();
                None
            }
        }
    }

    /// Remove the mapping without closing the frame (ownership transfer).
    pub fn remove(&self, reference: &PageReference) -> Option<Arc<KeyValueLeafPage>> {
        self.remove_key(&reference.cache_key())
    }

    /// `remove` by snapshot key; used for fragment descriptors.
    pub fn remove_key(&self, key: &PageRefKey) -> Option<Arc<KeyValueLeafPage>> {
        let shard = self.shard_for(key);
        shard.map.remove(key).map(|(_, slot)| {
            self.stats.record_removal();
            slot.frame
        })
    }

    /// Remove every mapping whose key matches and close the frames.
    pub fn invalidate_matching(&self, predicate: &dyn Fn(&PageRefKey) -> bool) -> usize {
        let mut closed = 0;
        for shard in &self.shards {
            let _eviction = shard.evict_lock.lock();
            let matching: Vec<PageRefKey> = shard
                .map
                .iter()
                .filter(|entry| predicate(entry.key()))
                .map(|entry| *entry.key())
                .collect();

            for key in matching {
                if let Some((_, slot)) = shard.map.remove(&key) {
                    slot.reference.unswizzle();
                    slot.frame.close();
                    if !slot.frame.is_closed() {
                        log::warn!(
                            "invalidated page {} still guarded, leaking close to guard holder",
                            slot.frame.page_key()
                        );
                    }
                    self.stats.record_eviction();
                    closed += 1;
                }
            }
        }
        closed
    }

    /// Remove every mapping, force-releasing any outstanding guards before
    /// closing the frames. Shutdown path.
    pub fn clear(&self) {
        for shard in &self.shards {
            let _eviction = shard.evict_lock.lock();
            let keys: Vec<PageRefKey> = shard.map.iter().map(|entry| *entry.key()).collect();
            for key in keys {
                if let Some((_, slot)) = shard.map.remove(&key) {
                    slot.reference.unswizzle();
                    let leaked = slot.frame.drain_guards();
                    if leaked > 0 {
                        self.leaked_guards.fetch_add(leaked as u64, Ordering::Relaxed);
                        log::warn!(
                            "released {} outstanding guards on page {} at clear",
                            leaked,
                            slot.frame.page_key()
                        );
                    }
                    slot.frame.close();
                }
            }
        }
    }

    pub fn close(&self) {
        self.clear();
        self.closed.store(true, Ordering::Release);
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|shard| shard.map.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Guards that were still live when `clear` ran.
    pub fn leaked_guards(&self) -> u64 {
        self.leaked_guards.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> CacheStats {
        let weight: usize = self
            .shards
            .iter()
            .flat_map(|shard| shard.map.iter().map(|entry| entry.frame.byte_weight()))
            .sum();
        self.stats.snapshot(self.len(), weight)
    }
}

impl Cache<Arc<PageReference>, Arc<KeyValueLeafPage>> for RecordPageCache {
    fn get(&self, key: &Arc<PageReference>) -> Option<Arc<KeyValueLeafPage>> {
        RecordPageCache::get(self, key)
    }

    fn get_with_loader(
        &self,
        key: Arc<PageReference>,
        loader: &dyn Fn(&Arc<PageReference>) -> Result<Arc<KeyValueLeafPage>>,
    ) -> Result<Arc<KeyValueLeafPage>> {
        self.compute(&key, || loader(&key))
    }

    fn put(&self, key: Arc<PageReference>, value: Arc<KeyValueLeafPage>) {
        RecordPageCache::put(self, key, value)
    }

    fn put_if_absent(
        &self,
        key: Arc<PageReference>,
        value: Arc<KeyValueLeafPage>,
    ) -> Option<Arc<KeyValueLeafPage>> {
        RecordPageCache::put_if_absent(self, key, value)
    }

    fn remove(&self, key: &Arc<PageReference>) -> Option<Arc<KeyValueLeafPage>> {
        RecordPageCache::remove(self, key)
    }

    fn clear(&self) {
        RecordPageCache::clear(self)
    }

    fn close(&self) {
        RecordPageCache::close(self)
    }
}

// ============================================================================
// Tests
// ============================================================================
