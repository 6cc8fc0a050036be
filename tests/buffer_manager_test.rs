// Buffer manager integration tests
// Exercises the cache hierarchy end to end: guards vs eviction, frame reuse
// detection, intent-log adoption, key-scoped invalidation, the physical
// memory budget and concurrent sweeping.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rand::Rng;

use verso_db::buffer::{BufferManagerBuilder, PageLoader, TransactionRegistry};
use verso_db::cache::{Cache, CacheSweeper, RecordPageCache, SweepScope};
use verso_db::common::IndexKind;
use verso_db::layout::{FixedSlotSerializer, NodeKind, NodeRecord, RecordSerializer, SlotWriter};
use verso_db::memory::{AllocatorConfig, SegmentAllocator};
use verso_db::page::{KeyValueLeafPage, PageContainer, PageGuard, PageReference};
use verso_db::DbError;

fn test_allocator(max_physical_bytes: u64) -> Arc<SegmentAllocator> {
    Arc::new(
        SegmentAllocator::new(AllocatorConfig {
            max_physical_bytes,
            segments_per_class: 512,
        })
        .unwrap(),
    )
}

fn load_frame(
    allocator: &Arc<SegmentAllocator>,
    reference: &Arc<PageReference>,
    revision: u64,
) -> Arc<KeyValueLeafPage> {
    let slots = allocator.allocate(4 * 1024).unwrap();
    Arc::new(KeyValueLeafPage::new(
        reference.key(),
        revision,
        IndexKind::Document,
        reference.database_id(),
        reference.resource_id(),
        slots,
        None,
        Arc::new(FixedSlotSerializer),
        allocator.clone(),
    ))
}

/// Page-loader double: reconstructs a one-segment frame per reference and
/// counts how often the miss path actually reaches it.
struct SegmentLoader {
    allocator: Arc<SegmentAllocator>,
    loads: AtomicUsize,
}

impl PageLoader for SegmentLoader {
    fn load(&self, reference: &PageReference) -> verso_db::Result<Arc<KeyValueLeafPage>> {
        self.loads.fetch_add(1, Ordering::Relaxed);
        let slots = self.allocator.allocate(4 * 1024)?;
        Ok(Arc::new(KeyValueLeafPage::new(
            reference.key(),
            1,
            IndexKind::Document,
            reference.database_id(),
            reference.resource_id(),
            slots,
            None,
            Arc::new(FixedSlotSerializer),
            self.allocator.clone(),
        )))
    }
}

#[test]
fn guard_protects_against_eviction() {
    let allocator = test_allocator(64 * 1024 * 1024);
    let cache = Arc::new(RecordPageCache::new(1));

    // Page P at revision 3.
    let reference = Arc::new(PageReference::new(1, 10, 7));
    let frame = load_frame(&allocator, &reference, 3);
    cache.put(reference.clone(), frame.clone());
    frame.clear_hot();

    // Watermark 10: revision 3 would be evictable if it were unguarded.
    let epoch = Arc::new(TransactionRegistry::new());
    epoch.register(1, 10);
    let sweeper = Arc::new(CacheSweeper::new(
        cache.clone(),
        epoch,
        SweepScope::resource(1, 10),
        Duration::from_millis(10),
    ));

    // Thread A holds a guard while thread B runs one full sweep cycle.
    let guard = cache.get_and_guard(&reference).unwrap();
    frame.clear_hot();

    let cycle = {
        let sweeper = sweeper.clone();
        thread::spawn(move || sweeper.sweep_once())
    };
    cycle.join().unwrap();

    assert!(sweeper.stats().guard_skips >= 1);
    assert_eq!(sweeper.stats().evictions, 0);
    assert_eq!(cache.len(), 1);

    // The guard observed no version change.
    guard.unfix().unwrap();
}

#[test]
fn frame_reuse_is_detected() {
    let allocator = test_allocator(64 * 1024 * 1024);
    let cache = Arc::new(RecordPageCache::new(1));
    let epoch = Arc::new(TransactionRegistry::new());
    epoch.register(1, 4);
    let sweeper = CacheSweeper::new(
        cache.clone(),
        epoch,
        SweepScope::resource(1, 10),
        Duration::from_millis(10),
    );

    // Page P at revision 3.
    let reference = Arc::new(PageReference::new(1, 10, 7));
    let old_frame = load_frame(&allocator, &reference, 3);
    cache.put(reference.clone(), old_frame.clone());
    old_frame.clear_hot();

    // A keeps a stale handle to the frame (e.g. from the swizzled hint).
    let stale = reference.swizzled().unwrap();

    // Watermark 4 > revision 3 and no guard: the sweep evicts P.
    sweeper.sweep_once();
    assert!(old_frame.is_closed());
    assert_eq!(sweeper.stats().evictions, 1);

    // A new page Q is loaded into the same reference object.
    let new_frame = load_frame(&allocator, &reference, 4);
    cache.put(reference.clone(), new_frame.clone());

    // A's guard was created against the evicted frame; its scope exit must
    // report the reuse.
    let stale_guard = PageGuard::fix(reference.clone(), stale);
    let err = stale_guard.unfix().unwrap_err();
    assert!(matches!(err, DbError::FrameReused));

    // The retried lookup observes Q.
    let retried = cache.get_and_guard(&reference).unwrap();
    assert!(Arc::ptr_eq(retried.frame(), &new_frame));
    retried.unfix().unwrap();
}

#[test]
fn intent_log_adoption() {
    let allocator = test_allocator(64 * 1024 * 1024);
    let manager = BufferManagerBuilder::new()
        .record_cache_shards(2)
        .fragment_cache_shards(2)
        .background_sweeper(false)
        .build(Arc::new(TransactionRegistry::new()));

    let reference = Arc::new(PageReference::new(1, 10, 7));
    let frame = load_frame(&allocator, &reference, 3);
    manager
        .record_page_cache()
        .put(reference.clone(), frame.clone());

    let borrowed_before = allocator.borrowed_segments();
    let log = manager.intent_log();
    log.put(&reference, PageContainer::single(frame.clone()));

    assert!(manager.record_page_cache().get(&reference).is_none());
    assert!(manager.page_fragment_cache().get(&reference).is_none());
    assert!(manager
        .generic_page_cache()
        .get(&reference.cache_key())
        .is_none());
    let container = log.get(&reference).unwrap();
    assert!(Arc::ptr_eq(container.complete(), &frame));

    // Commit: the complete side is closed and its segments go back to the
    // allocator's free pool.
    log.close();
    assert!(frame.is_closed());
    assert_eq!(allocator.borrowed_segments(), borrowed_before - 1);

    // The freed segment is reusable right away.
    let again = allocator.allocate(4 * 1024).unwrap();
    allocator.release(again);
}

#[test]
fn per_resource_invalidation_is_exact() {
    let allocator = test_allocator(64 * 1024 * 1024);
    let manager = BufferManagerBuilder::new()
        .record_cache_shards(4)
        .background_sweeper(false)
        .build(Arc::new(TransactionRegistry::new()));

    let mut matching = Vec::new();
    let mut others = Vec::new();
    for database_id in [1u32, 2] {
        for resource_id in [10u32, 20] {
            for key in 0..25 {
                let reference = Arc::new(PageReference::new(database_id, resource_id, key));
                let frame = load_frame(&allocator, &reference, 1);
                manager.record_page_cache().put(reference, frame.clone());
                if database_id == 1 && resource_id == 20 {
                    matching.push(frame);
                } else {
                    others.push(frame);
                }
            }
        }
    }

    manager.clear_for_resource(1, 20);

    assert_eq!(manager.record_page_cache().len(), 75);
    assert!(matching.iter().all(|frame| frame.is_closed()));
    assert!(others.iter().all(|frame| !frame.is_closed()));
}

#[test]
fn out_of_memory_and_recovery() {
    let allocator = test_allocator(4 * 1024);

    let first = allocator.allocate(4 * 1024).unwrap();
    let err = allocator.allocate(4 * 1024).unwrap_err();
    assert!(matches!(err, DbError::OutOfMemory(_)));

    allocator.release(first);
    let second = allocator.allocate(4 * 1024).unwrap();
    allocator.release(second);
}

#[test]
fn physical_counter_matches_live_segments() {
    let allocator = test_allocator(256 * 1024 * 1024);
    let stop = Arc::new(AtomicBool::new(false));

    let mut workers = Vec::new();
    for _ in 0..4 {
        let allocator = allocator.clone();
        let stop = stop.clone();
        workers.push(thread::spawn(move || {
            let mut held = Vec::new();
            let mut size = 4 * 1024;
            while !stop.load(Ordering::Relaxed) {
                if held.len() < 32 {
                    if let Ok(segment) = allocator.allocate(size) {
                        held.push(segment);
                    }
                    size = if size >= 64 * 1024 { 4 * 1024 } else { size * 2 };
                } else {
                    for segment in held.drain(..) {
                        allocator.release(segment);
                    }
                }
            }
            held
        }));
    }

    thread::sleep(Duration::from_millis(100));
    stop.store(true, Ordering::Relaxed);

    for worker in workers {
        for segment in worker.join().unwrap() {
            allocator.release(segment);
        }
    }

    // At steady state the counter equals the ladder sizes of everything
    // still allocated, which is now nothing.
    assert_eq!(allocator.physical_bytes(), 0);
    assert_eq!(allocator.borrowed_segments(), 0);
    assert_eq!(allocator.stats().double_releases, 0);
}

#[test]
fn sweeper_runs_concurrently_with_lookups() {
    let allocator = test_allocator(256 * 1024 * 1024);
    let cache = Arc::new(RecordPageCache::new(4));
    let epoch = Arc::new(TransactionRegistry::new());
    let sweeper = Arc::new(CacheSweeper::new(
        cache.clone(),
        epoch,
        SweepScope::global(),
        Duration::from_millis(1),
    ));
    sweeper.start();

    let mut references = Vec::new();
    for key in 0..64 {
        let reference = Arc::new(PageReference::new(1, 10, key));
        let frame = load_frame(&allocator, &reference, 1);
        cache.put(reference.clone(), frame);
        references.push(reference);
    }

    let loader = Arc::new(SegmentLoader {
        allocator: allocator.clone(),
        loads: AtomicUsize::new(0),
    });
    let reuse_detections = Arc::new(AtomicUsize::new(0));
    let mut readers = Vec::new();
    for _ in 0..4 {
        let cache = cache.clone();
        let loader = loader.clone();
        let references = references.clone();
        let reuse_detections = reuse_detections.clone();
        readers.push(thread::spawn(move || {
            let mut rng = rand::rng();
            for _ in 0..200 {
                let reference = &references[rng.random_range(0..references.len())];
                match cache.get_and_guard(reference) {
                    Some(guard) => {
                        if guard.unfix().is_err() {
                            reuse_detections.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                    None => {
                        // Reload through the page loader, racing the other
                        // readers.
                        let _ = cache.get_or_load(reference, loader.as_ref());
                    }
                }
            }
        }));
    }

    for reader in readers {
        reader.join().unwrap();
    }
    sweeper.stop();

    // Whatever the interleaving, no frame in the map is closed and the
    // accounting is consistent once everything is cleared.
    cache.clear();
    assert_eq!(cache.len(), 0);
    assert_eq!(allocator.borrowed_segments(), 0);
    assert_eq!(allocator.physical_bytes(), 0);
}

#[test]
fn page_loader_reconstructs_on_miss_only() {
    let allocator = test_allocator(64 * 1024 * 1024);
    let manager = BufferManagerBuilder::new()
        .record_cache_shards(2)
        .background_sweeper(false)
        .build(Arc::new(TransactionRegistry::new()));
    let loader = SegmentLoader {
        allocator: allocator.clone(),
        loads: AtomicUsize::new(0),
    };

    let reference = Arc::new(PageReference::new(1, 10, 7));
    let loaded = manager.get_record_page(&reference, &loader).unwrap();
    let hit = manager.get_record_page(&reference, &loader).unwrap();

    assert!(Arc::ptr_eq(&loaded, &hit));
    assert_eq!(loader.loads.load(Ordering::Relaxed), 1);
    assert!(Arc::ptr_eq(&reference.swizzled().unwrap(), &loaded));

    // Once the cache drops the page, the next fetch goes back to the loader.
    manager.clear_all();
    assert!(loaded.is_closed());
    let reloaded = manager.get_record_page(&reference, &loader).unwrap();
    assert_eq!(loader.loads.load(Ordering::Relaxed), 2);
    assert!(!Arc::ptr_eq(&reloaded, &loaded));
}

#[test]
fn serializer_writes_through_projector_into_frame() {
    let allocator = test_allocator(64 * 1024 * 1024);
    let reference = Arc::new(PageReference::new(1, 10, 7));
    let frame = load_frame(&allocator, &reference, 1);

    let record = NodeRecord {
        kind: NodeKind::Text,
        fields: vec![100, 99, 101, 0xBEEF, 2, 3],
        payloads: vec![(bytes::Bytes::from_static(b"buffered text"), 0)],
    };

    frame.with_slot_data_mut(|data| {
        let data = data.unwrap();
        let mut writer = SlotWriter::new(NodeKind::Text, data).unwrap();
        frame.serializer().serialize(&record, &mut writer).unwrap();
        writer.finish().unwrap();
    });
    frame.set_record_slot(100, 0);
    frame.set_last_slot_index(0);

    frame.with_slot_data(|data| {
        let data = data.unwrap();
        let reader = verso_db::layout::SlotReader::new(NodeKind::Text, data).unwrap();
        assert_eq!(reader.field(0), 100);
        assert_eq!(reader.payload(0).unwrap(), b"buffered text");
    });

    assert_eq!(frame.record_slot(100), Some(0));
    frame.close();
}

#[test]
fn scoped_sweeper_keeps_watermarked_revisions() {
    let allocator = test_allocator(64 * 1024 * 1024);
    let cache = Arc::new(RecordPageCache::new(1));
    let epoch = Arc::new(TransactionRegistry::new());

    // An old transaction still reads revision 2.
    epoch.register(1, 2);
    let sweeper = CacheSweeper::new(
        cache.clone(),
        epoch.clone(),
        SweepScope::resource(1, 10),
        Duration::from_millis(10),
    );

    let reference = Arc::new(PageReference::new(1, 10, 7));
    let frame = load_frame(&allocator, &reference, 5);
    cache.put(reference.clone(), frame.clone());
    frame.clear_hot();

    sweeper.sweep_once();
    assert!(!frame.is_closed());
    assert!(sweeper.stats().watermark_skips >= 1);

    // The reader finishes; the next sweep may evict.
    epoch.unregister(1);
    epoch.register(2, 6);
    sweeper.sweep_once();
    assert!(frame.is_closed());
    assert!(cache.is_empty());
}
