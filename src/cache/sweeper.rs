// # Background Clock Sweeper
//
// Second-chance eviction over the record-page cache. One dedicated worker
// per shard wakes on a fixed interval, try-locks the shard's eviction mutex
// and walks the clock hand over a snapshot of the key set. Hot frames get a
// second chance, guarded frames are kept, and a scoped sweeper additionally
// keeps every frame whose revision is still reachable by an active
// transaction.
//
// The clock hand is never reset when the map shrinks; every step bounds it
// by modulo over the current snapshot.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use serde::Serialize;

use crate::buffer::epoch::EpochTracker;
use crate::cache::frame_cache::{FrameShard, RecordPageCache};
use crate::common::{DatabaseId, ResourceId};
use crate::page::reference::PageRefKey;

/// Scope of a sweeper. `(0, 0)` means global: the sweeper visits every key
/// and ignores the revision watermark.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepScope {
    pub database_id: DatabaseId,
    pub resource_id: ResourceId,
}

impl SweepScope {
    pub fn global() -> Self {
        Self {
            database_id: 0,
            resource_id: 0,
        }
    }

    pub fn resource(database_id: DatabaseId, resource_id: ResourceId) -> Self {
        Self {
            database_id,
            resource_id,
        }
    }

    #[inline(always)]
    pub fn is_global(&self) -> bool {
        self.database_id == 0 && self.resource_id == 0
    }

    #[inline(always)]
    fn matches(&self, key: &PageRefKey) -> bool {
        key.database_id == self.database_id && key.resource_id == self.resource_id
    }
}

// ============================================================================
// Statistics
// ============================================================================

#[derive(Default)]
pub struct SweeperStatsRecorder {
    cycles: AtomicU64,
    evictions: AtomicU64,
    hot_skips: AtomicU64,
    guard_skips: AtomicU64,
    watermark_skips: AtomicU64,
    ownership_skips: AtomicU64,
}

impl SweeperStatsRecorder {
    pub fn snapshot(&self) -> SweeperStats {
        SweeperStats {
            cycles: self.cycles.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            hot_skips: self.hot_skips.load(Ordering::Relaxed),
            guard_skips: self.guard_skips.load(Ordering::Relaxed),
            watermark_skips: self.watermark_skips.load(Ordering::Relaxed),
            ownership_skips: self.ownership_skips.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time sweeper statistics
#[derive(Debug, Clone, Serialize)]
pub struct SweeperStats {
    pub cycles: u64,
    pub evictions: u64,
    /// Second-chance skips: the HOT bit was set and got cleared
    pub hot_skips: u64,
    /// Frames kept because a guard was live
    pub guard_skips: u64,
    /// Frames kept because their revision is at or above the watermark
    pub watermark_skips: u64,
    /// Keys that vanished between the snapshot and the visit
    pub ownership_skips: u64,
}

// ============================================================================
// Sweeper
// ============================================================================

/// Periodic second-chance sweeper over a record-page cache.
pub struct CacheSweeper {
    cache: Arc<RecordPageCache>,
    epoch: Arc<dyn EpochTracker>,
    scope: SweepScope,
    interval: Duration,
    shutdown: Arc<AtomicBool>,
    workers: Mutex<Vec<thread::JoinHandle<()>>>,
    stats: Arc<SweeperStatsRecorder>,
}

impl CacheSweeper {
    pub fn new(
        cache: Arc<RecordPageCache>,
        epoch: Arc<dyn EpochTracker>,
        scope: SweepScope,
        interval: Duration,
    ) -> Self {
        Self {
            cache,
            epoch,
            scope,
            interval,
            shutdown: Arc::new(AtomicBool::new(false)),
            workers: Mutex::new(Vec::new()),
            stats: Arc::new(SweeperStatsRecorder::default()),
        }
    }

    /// Spawn one worker per shard.
    pub fn start(&self) {
        let mut workers = self.workers.lock();
        if !workers.is_empty() {
            return;
        }

        for shard_index in 0..self.cache.shard_count() {
            let cache = self.cache.clone();
            let epoch = self.epoch.clone();
            let scope = self.scope;
            let interval = self.interval;
            let shutdown = self.shutdown.clone();
            let stats = self.stats.clone();

            let handle = thread::Builder::new()
                .name(format!("verso-sweeper-{}", shard_index))
                .spawn(move || {
                    while !shutdown.load(Ordering::Relaxed) {
                        thread::sleep(interval);
                        if shutdown.load(Ordering::Relaxed) {
                            break;
                        }
                        sweep_shard(
                            &cache.shards()[shard_index],
                            scope,
                            epoch.as_ref(),
                            &stats,
                        );
                    }
                })
                .expect("failed to spawn sweeper worker thread");
            workers.push(handle);
        }
    }

    /// Stop the workers and wait for them to exit.
    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::Release);
        let mut workers = self.workers.lock();
        for handle in workers.drain(..) {
            let _ = handle.join();
        }
    }

    /// Run one synchronous cycle over every shard.
    pub fn sweep_once(&self) {
        for shard in self.cache.shards() {
            sweep_shard(shard, self.scope, self.epoch.as_ref(), &self.stats);
        }
    }

    pub fn stats(&self) -> SweeperStats {
        self.stats.snapshot()
    }
}

impl Drop for CacheSweeper {
    fn drop(&mut self) {
        self.stop();
    }
}

/// One sweep cycle over one shard.
pub(crate) fn sweep_shard(
    shard: &FrameShard,
    scope: SweepScope,
    epoch: &dyn EpochTracker,
    stats: &SweeperStatsRecorder,
) {
    // Skip the cycle entirely when eviction is contended.
    let Some(_eviction) = shard.evict_lock.try_lock() else {
        return;
    };
    stats.cycles.fetch_add(1, Ordering::Relaxed);

    let watermark = epoch.minimum_active_revision();
    let keys: Vec<PageRefKey> = shard.map.iter().map(|entry| *entry.key()).collect();
    if keys.is_empty() {
        return;
    }

    let steps = std::cmp::max(10, keys.len() / 10);
    for _ in 0..steps {
        let hand = shard.clock_hand.fetch_add(1, Ordering::Relaxed);
        let key = keys[hand % keys.len()];

        if !scope.is_global() && !scope.matches(&key) {
            continue;
        }

        match shard.map.entry(key) {
            Entry::Occupied(occupied) => {
                let frame = occupied.get().frame.clone();

                if frame.clear_hot() {
                    // Second chance: the bit is cleared, the frame stays.
                    stats.hot_skips.fetch_add(1, Ordering::Relaxed);
                    continue;
                }
                if frame.get_guard_count() > 0 {
                    stats.guard_skips.fetch_add(1, Ordering::Relaxed);
                    continue;
                }
                if !scope.is_global() && frame.revision() >= watermark {
                    stats.watermark_skips.fetch_add(1, Ordering::Relaxed);
                    continue;
                }

                occupied.get().reference.unswizzle();
                frame.close();
                if frame.is_closed() {
                    occupied.remove();
                    stats.evictions.fetch_add(1, Ordering::Relaxed);
                } else {
                    // A guard slipped in between the count check and the
                    // close; the frame stays mapped.
                    stats.guard_skips.fetch_add(1, Ordering::Relaxed);
                }
            }
            Entry::Vacant(_) => {
                // The key vanished since the snapshot: removed by the
                // intent log or an invalidation.
                stats.ownership_skips.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
