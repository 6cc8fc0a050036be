// # Buffer Manager - Facade over the Cache Hierarchy
//
// Owns the record-page and fragment caches, the five tier caches and the
// background sweepers. Collaborators obtain each cache through typed
// accessors; key-scoped invalidation walks every cache's map and
// removes-and-closes matching entries under per-key compute.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::cache::keys::ScopedKey;
use crate::cache::sweeper::{CacheSweeper, SweepScope, SweeperStats};
use crate::cache::tiers::{
    GenericPageCache, IndexNodeCache, NamesCache, PathSummaryCache, RevisionRootCache,
};
use crate::cache::{Cache, CacheStats, RecordPageCache};
use crate::common::{DatabaseId, ResourceId};
use crate::buffer::epoch::EpochTracker;
use crate::buffer::intent_log::TransactionIntentLog;
use crate::buffer::loader::PageLoader;
use crate::memory::{AllocatorStats, SegmentAllocator};
use crate::page::frame::KeyValueLeafPage;
use crate::page::reference::PageReference;

// ============================================================================
// Configuration
// ============================================================================

/// Buffer manager configuration
#[derive(Debug, Clone)]
pub struct BufferManagerConfig {
    /// Shards of the record-page cache (one sweeper worker each)
    pub record_cache_shards: usize,

    /// Shards of the page-fragment cache
    pub fragment_cache_shards: usize,

    /// Entry capacity of the generic page cache
    pub generic_page_capacity: usize,

    /// Entry capacity of the revision-root cache
    pub revision_root_capacity: usize,

    /// Weight budget of the red-black index-node cache in bytes
    pub index_node_weight: usize,

    /// Weight budget of the names cache in bytes
    pub names_weight: usize,

    /// Entry capacity of the path-summary cache
    pub path_summary_capacity: usize,

    /// Sweep interval of the background sweepers
    pub sweep_interval: Duration,

    /// Scope of the sweepers; `(0, 0)` sweeps globally
    pub sweep_scope: SweepScope,

    /// Whether to run background sweepers at all
    pub enable_sweeper: bool,
}

impl Default for BufferManagerConfig {
    fn default() -> Self {
        Self {
            record_cache_shards: num_cpus::get(),
            fragment_cache_shards: num_cpus::get().min(4),
            generic_page_capacity: 1024,
            revision_root_capacity: 64,
            index_node_weight: 8 * 1024 * 1024,
            names_weight: 4 * 1024 * 1024,
            path_summary_capacity: 4096,
            sweep_interval: Duration::from_millis(500),
            sweep_scope: SweepScope::global(),
            enable_sweeper: true,
        }
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Builder for [`BufferManager`]
pub struct BufferManagerBuilder {
    config: BufferManagerConfig,
    allocator: Option<Arc<SegmentAllocator>>,
}

impl BufferManagerBuilder {
    pub fn new() -> Self {
        Self {
            config: BufferManagerConfig::default(),
            allocator: None,
        }
    }

    pub fn record_cache_shards(mut self, shards: usize) -> Self {
        self.config.record_cache_shards = shards.max(1);
        self
    }

    pub fn fragment_cache_shards(mut self, shards: usize) -> Self {
        self.config.fragment_cache_shards = shards.max(1);
        self
    }

    pub fn generic_page_capacity(mut self, capacity: usize) -> Self {
        self.config.generic_page_capacity = capacity;
        self
    }

    pub fn revision_root_capacity(mut self, capacity: usize) -> Self {
        self.config.revision_root_capacity = capacity;
        self
    }

    pub fn index_node_weight(mut self, weight: usize) -> Self {
        self.config.index_node_weight = weight;
        self
    }

    pub fn names_weight(mut self, weight: usize) -> Self {
        self.config.names_weight = weight;
        self
    }

    pub fn path_summary_capacity(mut self, capacity: usize) -> Self {
        self.config.path_summary_capacity = capacity;
        self
    }

    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.config.sweep_interval = interval;
        self
    }

    pub fn sweep_scope(mut self, scope: SweepScope) -> Self {
        self.config.sweep_scope = scope;
        self
    }

    pub fn background_sweeper(mut self, enabled: bool) -> Self {
        self.config.enable_sweeper = enabled;
        self
    }

    /// Allocator to free at shutdown, after every frame is closed.
    pub fn allocator(mut self, allocator: Arc<SegmentAllocator>) -> Self {
        self.allocator = Some(allocator);
        self
    }

    pub fn build(self, epoch: Arc<dyn EpochTracker>) -> BufferManager {
        BufferManager::new(self.config, epoch, self.allocator)
    }
}

impl Default for BufferManagerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Buffer Manager
// ============================================================================

/// The buffer manager facade.
pub struct BufferManager {
    config: BufferManagerConfig,
    record_pages: Arc<RecordPageCache>,
    page_fragments: Arc<RecordPageCache>,
    generic_pages: Arc<GenericPageCache>,
    revision_roots: Arc<RevisionRootCache>,
    index_nodes: Arc<IndexNodeCache>,
    names: Arc<NamesCache>,
    path_summaries: Arc<PathSummaryCache>,
    sweepers: Vec<CacheSweeper>,
    allocator: Option<Arc<SegmentAllocator>>,
    closed: AtomicBool,
}

impl BufferManager {
    pub fn new(
        config: BufferManagerConfig,
        epoch: Arc<dyn EpochTracker>,
        allocator: Option<Arc<SegmentAllocator>>,
    ) -> Self {
        let record_pages = Arc::new(RecordPageCache::new(config.record_cache_shards));
        let page_fragments = Arc::new(RecordPageCache::new(config.fragment_cache_shards));

        let mut sweepers = Vec::new();
        if config.enable_sweeper {
            for cache in [&record_pages, &page_fragments] {
                let sweeper = CacheSweeper::new(
                    cache.clone(),
                    epoch.clone(),
                    config.sweep_scope,
                    config.sweep_interval,
                );
                sweeper.start();
                sweepers.push(sweeper);
            }
        }

        Self {
            record_pages,
            page_fragments,
            generic_pages: Arc::new(GenericPageCache::new(config.generic_page_capacity)),
            revision_roots: Arc::new(RevisionRootCache::new(config.revision_root_capacity)),
            index_nodes: Arc::new(IndexNodeCache::new(config.index_node_weight)),
            names: Arc::new(NamesCache::new(config.names_weight)),
            path_summaries: Arc::new(PathSummaryCache::new(config.path_summary_capacity)),
            sweepers,
            allocator,
            closed: AtomicBool::new(false),
            config,
        }
    }

    pub fn config(&self) -> &BufferManagerConfig {
        &self.config
    }

    // ------------------------------------------------------------------
    // Typed cache accessors
    // ------------------------------------------------------------------

    pub fn record_page_cache(&self) -> &Arc<RecordPageCache> {
        &self.record_pages
    }

    pub fn page_fragment_cache(&self) -> &Arc<RecordPageCache> {
        &self.page_fragments
    }

    pub fn generic_page_cache(&self) -> &Arc<GenericPageCache> {
        &self.generic_pages
    }

    pub fn revision_root_cache(&self) -> &Arc<RevisionRootCache> {
        &self.revision_roots
    }

    pub fn index_node_cache(&self) -> &Arc<IndexNodeCache> {
        &self.index_nodes
    }

    pub fn names_cache(&self) -> &Arc<NamesCache> {
        &self.names
    }

    pub fn path_summary_cache(&self) -> &Arc<PathSummaryCache> {
        &self.path_summaries
    }

    /// A fresh intent log wired to the caches a transaction steals from.
    pub fn intent_log(&self) -> TransactionIntentLog {
        TransactionIntentLog::new(
            self.record_pages.clone(),
            self.page_fragments.clone(),
            self.generic_pages.clone(),
        )
    }

    /// Fetch a record page, reconstructing it through `loader` on miss.
    pub fn get_record_page(
        &self,
        reference: &Arc<PageReference>,
        loader: &dyn PageLoader,
    ) -> crate::error::Result<Arc<KeyValueLeafPage>> {
        self.record_pages.get_or_load(reference, loader)
    }

    /// Fetch a page fragment, reconstructing it through `loader` on miss.
    pub fn get_page_fragment(
        &self,
        reference: &Arc<PageReference>,
        loader: &dyn PageLoader,
    ) -> crate::error::Result<Arc<KeyValueLeafPage>> {
        self.page_fragments.get_or_load(reference, loader)
    }

    // ------------------------------------------------------------------
    // Key-scoped invalidation
    // ------------------------------------------------------------------

    /// Drop and close everything cached for `database_id`.
    pub fn clear_for_database(&self, database_id: DatabaseId) {
        self.record_pages
            .invalidate_matching(&|key| key.in_database(database_id));
        self.page_fragments
            .invalidate_matching(&|key| key.in_database(database_id));
        self.generic_pages
            .invalidate_matching(&|key| key.in_database(database_id));
        self.revision_roots
            .invalidate_matching(&|key| key.in_database(database_id));
        self.index_nodes
            .invalidate_matching(&|key| key.in_database(database_id));
        self.names
            .invalidate_matching(&|key| key.in_database(database_id));
        self.path_summaries
            .invalidate_matching(&|key| key.in_database(database_id));
        self.drain_maintenance();
    }

    /// Drop and close everything cached for `(database_id, resource_id)`.
    pub fn clear_for_resource(&self, database_id: DatabaseId, resource_id: ResourceId) {
        self.record_pages
            .invalidate_matching(&|key| key.in_resource(database_id, resource_id));
        self.page_fragments
            .invalidate_matching(&|key| key.in_resource(database_id, resource_id));
        self.generic_pages
            .invalidate_matching(&|key| key.in_resource(database_id, resource_id));
        self.revision_roots
            .invalidate_matching(&|key| key.in_resource(database_id, resource_id));
        self.index_nodes
            .invalidate_matching(&|key| key.in_resource(database_id, resource_id));
        self.names
            .invalidate_matching(&|key| key.in_resource(database_id, resource_id));
        self.path_summaries
            .invalidate_matching(&|key| key.in_resource(database_id, resource_id));
        self.drain_maintenance();
    }

    /// Empty every cache; used at shutdown.
    pub fn clear_all(&self) {
        self.record_pages.clear();
        self.page_fragments.clear();
        self.generic_pages.clear();
        self.revision_roots.clear();
        self.index_nodes.clear();
        self.names.clear();
        self.path_summaries.clear();
        self.drain_maintenance();
    }

    fn drain_maintenance(&self) {
        self.generic_pages.clean_up();
        self.revision_roots.clean_up();
        self.index_nodes.clean_up();
        self.names.clean_up();
        self.path_summaries.clean_up();
    }

    /// Stop the sweepers, close every frame and free the allocator.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        for sweeper in &self.sweepers {
            sweeper.stop();
        }
        self.clear_all();

        let leaked =
            self.record_pages.leaked_guards() + self.page_fragments.leaked_guards();
        if leaked > 0 {
            log::warn!("buffer manager closed with {} leaked guards", leaked);
        }

        if let Some(ref allocator) = self.allocator {
            allocator.free();
        }
    }

    pub fn stats(&self) -> BufferManagerStats {
        BufferManagerStats {
            record_pages: self.record_pages.stats(),
            page_fragments: self.page_fragments.stats(),
            generic_pages: self.generic_pages.stats(),
            revision_roots: self.revision_roots.stats(),
            index_nodes: self.index_nodes.stats(),
            names: self.names.stats(),
            path_summaries: self.path_summaries.stats(),
            sweepers: self.sweepers.iter().map(|sweeper| sweeper.stats()).collect(),
            leaked_guards: self.record_pages.leaked_guards()
                + self.page_fragments.leaked_guards(),
            allocator: self.allocator.as_ref().map(|allocator| allocator.stats()),
        }
    }
}

impl Drop for BufferManager {
    fn drop(&mut self) {
        self.close();
    }
}

/// Point-in-time statistics across the whole buffer manager
#[derive(Debug, Clone, Serialize)]
pub struct BufferManagerStats {
    pub record_pages: CacheStats,
    pub page_fragments: CacheStats,
    pub generic_pages: CacheStats,
    pub revision_roots: CacheStats,
    pub index_nodes: CacheStats,
    pub names: CacheStats,
    pub path_summaries: CacheStats,
    pub sweepers: Vec<SweeperStats>,
    pub leaked_guards: u64,
    pub allocator: Option<AllocatorStats>,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::epoch::TransactionRegistry;
    use crate::common::IndexKind;
    use crate::layout::slot::FixedSlotSerializer;
    use crate::memory::AllocatorConfig;
    use crate::page::frame::KeyValueLeafPage;
    use crate::page::reference::PageReference;

    fn test_allocator() -> Arc<SegmentAllocator> {
        Arc::new(
            SegmentAllocator::new(AllocatorConfig {
                max_physical_bytes: 64 * 1024 * 1024,
                segments_per_class: 256,
            })
            .unwrap(),
        )
    }

    fn manager_without_sweeper() -> BufferManager {
        BufferManagerBuilder::new()
            .record_cache_shards(2)
            .fragment_cache_shards(2)
            .background_sweeper(false)
            .build(Arc::new(TransactionRegistry::new()))
    }

    fn insert_frame(
        manager: &BufferManager,
        allocator: &Arc<SegmentAllocator>,
        database_id: u32,
        resource_id: u32,
        key: i64,
    ) -> Arc<KeyValueLeafPage> {
        let reference = Arc::new(PageReference::new(database_id, resource_id, key));
        let slots = allocator.allocate(4 * 1024).unwrap();
        let frame = Arc::new(KeyValueLeafPage::new(
            key,
            1,
            IndexKind::Document,
            database_id,
            resource_id,
            slots,
            None,
            Arc::new(FixedSlotSerializer),
            allocator.clone(),
        ));
        manager.record_page_cache().put(reference, frame.clone());
        frame
    }

    #[test]
    fn test_per_resource_invalidation() {
        let allocator = test_allocator();
        let manager = manager_without_sweeper();

        let mut matching = Vec::new();
        let mut others = Vec::new();
        for database_id in [1u32, 2] {
            for resource_id in [10u32, 20] {
                for key in 0..25 {
                    let frame =
                        insert_frame(&manager, &allocator, database_id, resource_id, key);
                    if database_id == 1 && resource_id == 20 {
                        matching.push(frame);
                    } else {
                        others.push(frame);
                    }
                }
            }
        }
        assert_eq!(manager.record_page_cache().len(), 100);

        manager.clear_for_resource(1, 20);

        assert_eq!(manager.record_page_cache().len(), 75);
        assert!(matching.iter().all(|frame| frame.is_closed()));
        assert!(others.iter().all(|frame| !frame.is_closed()));
    }

    #[test]
    fn test_per_database_invalidation_spans_tiers() {
        let allocator = test_allocator();
        let manager = manager_without_sweeper();

        insert_frame(&manager, &allocator, 1, 10, 0);
        insert_frame(&manager, &allocator, 2, 10, 0);

        manager.names_cache().put(
            crate::cache::keys::NamesCacheKey {
                database_id: 1,
                resource_id: 10,
                revision: 1,
                index_number: 0,
            },
            Arc::new(crate::page::pages::NameTable::new(Default::default())),
        );
        manager.path_summaries.put(
            crate::cache::keys::PathSummaryKey {
                database_id: 2,
                resource_id: 10,
                path_node_key: 1,
            },
            Arc::new(crate::page::pages::PathSummaryNode {
                path_node_key: 1,
                parent_key: 0,
                name: "p".into(),
                level: 1,
            }),
        );

        manager.clear_for_database(1);

        assert_eq!(manager.record_page_cache().len(), 1);
        assert_eq!(manager.names_cache().len(), 0);
        assert_eq!(manager.path_summary_cache().len(), 1);
    }

    #[test]
    fn test_close_frees_everything() {
        let allocator = test_allocator();
        let manager = BufferManagerBuilder::new()
            .record_cache_shards(2)
            .background_sweeper(false)
            .allocator(allocator.clone())
            .build(Arc::new(TransactionRegistry::new()));

        let frame = insert_frame(&manager, &allocator, 1, 10, 0);
        manager.close();

        assert!(frame.is_closed());
        assert_eq!(allocator.borrowed_segments(), 0);
        // Closing twice is a no-op.
        manager.close();
    }

    #[test]
    fn test_stats_snapshot() {
        let allocator = test_allocator();
        let manager = manager_without_sweeper();
        insert_frame(&manager, &allocator, 1, 10, 0);

        let stats = manager.stats();
        assert_eq!(stats.record_pages.entries, 1);
        assert_eq!(stats.record_pages.weight, 4 * 1024);
        assert!(stats.sweepers.is_empty());
    }

    #[test]
    fn test_get_record_page_loads_through_collaborator() {
        struct SegmentLoader {
            allocator: Arc<SegmentAllocator>,
        }

        impl PageLoader for SegmentLoader {
            fn load(
                &self,
                reference: &PageReference,
            ) -> crate::error::Result<Arc<KeyValueLeafPage>> {
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

        let manager = manager_without_sweeper();
        let loader = SegmentLoader {
            allocator: test_allocator(),
        };
        let reference = Arc::new(PageReference::new(1, 10, 7));

        let loaded = manager.get_record_page(&reference, &loader).unwrap();
        let hit = manager.get_record_page(&reference, &loader).unwrap();

        assert!(Arc::ptr_eq(&loaded, &hit));
        assert_eq!(manager.record_page_cache().len(), 1);
        assert!(manager.page_fragment_cache().is_empty());
    }

    #[test]
    fn test_intent_log_wiring() {
        let allocator = test_allocator();
        let manager = manager_without_sweeper();
        let frame = insert_frame(&manager, &allocator, 1, 10, 7);
        let reference = Arc::new(PageReference::new(1, 10, 7));

        let log = manager.intent_log();
        log.put(
            &reference,
            crate::page::container::PageContainer::single(frame),
        );

        assert!(manager.record_page_cache().is_empty());
        assert!(log.get(&reference).is_some());
    }
}
