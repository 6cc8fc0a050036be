// # Tier Caches
//
// The five caches besides the record-page caches, each a thin wrapper around
// the weight-bounded cache with a tier-specific hook: the generic page cache
// rejects frame-typed values, the revision-root cache unswizzles nested
// references on insertion, and the red-black index-node cache unlinks
// evicted nodes from their parents.

use std::sync::Arc;

use crate::cache::keys::{IndexLogKey, NamesCacheKey, PathSummaryKey, RevisionRootKey};
use crate::cache::weighted::WeightedCache;
use crate::cache::{Cache, CacheStats};
use crate::error::{DbError, Result};
use crate::page::pages::{IndexNode, IndexedPage, NameTable, PathSummaryNode, RevisionRootPage};
use crate::page::reference::PageRefKey;

// ============================================================================
// Generic Page Cache
// ============================================================================

/// Cache for root and index pages, keyed by page reference.
///
/// Record frames are rejected: they belong to the sharded frame caches where
/// the sweeper governs their lifetime.
pub struct GenericPageCache {
    inner: WeightedCache<PageRefKey, IndexedPage>,
}

impl GenericPageCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            inner: WeightedCache::new(max_entries),
        }
    }

    /// Insert, rejecting frame-typed values.
    pub fn try_put(&self, key: PageRefKey, page: IndexedPage) -> Result<()> {
        if page.is_frame() {
            return Err(DbError::InvalidArgument(
                "record-page frames do not belong in the generic page cache".into(),
            ));
        }
        self.inner.put(key, page);
        Ok(())
    }

    pub fn invalidate_matching(&self, predicate: &dyn Fn(&PageRefKey) -> bool) -> usize {
        self.inner.invalidate_matching(predicate)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.stats()
    }
}

impl Cache<PageRefKey, IndexedPage> for GenericPageCache {
    fn get(&self, key: &PageRefKey) -> Option<IndexedPage> {
        self.inner.get(key)
    }

    fn get_with_loader(
        &self,
        key: PageRefKey,
        loader: &dyn Fn(&PageRefKey) -> Result<IndexedPage>,
    ) -> Result<IndexedPage> {
        self.inner.get_with_loader(key, &|key| {
            let page = loader(key)?;
            if page.is_frame() {
                return Err(DbError::InvalidArgument(
                    "record-page frames do not belong in the generic page cache".into(),
                ));
            }
            Ok(page)
        })
    }

    fn put(&self, key: PageRefKey, value: IndexedPage) {
        if let Err(e) = self.try_put(key, value) {
            log::error!("rejected generic page cache insertion: {}", e);
        }
    }

    fn put_if_absent(&self, key: PageRefKey, value: IndexedPage) -> Option<IndexedPage> {
        if value.is_frame() {
            log::error!("rejected generic page cache insertion: frame-typed value");
            return None;
        }
        self.inner.put_if_absent(key, value)
    }

    fn remove(&self, key: &PageRefKey) -> Option<IndexedPage> {
        self.inner.remove(key)
    }

    fn clear(&self) {
        self.inner.clear()
    }

    fn close(&self) {
        self.inner.close()
    }

    fn clean_up(&self) {
        self.inner.clean_up()
    }
}

// ============================================================================
// Revision-Root Cache
// ============================================================================

/// Cache of revision roots keyed by (database, resource, revision).
///
/// Every insertion unswizzles the nested page references first; a cached
/// revision root must never transitively pin frames.
pub struct RevisionRootCache {
    inner: WeightedCache<RevisionRootKey, Arc<RevisionRootPage>>,
}

impl RevisionRootCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            inner: WeightedCache::new(max_entries),
        }
    }

    pub fn invalidate_matching(&self, predicate: &dyn Fn(&RevisionRootKey) -> bool) -> usize {
        self.inner.invalidate_matching(predicate)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.stats()
    }
}

impl Cache<RevisionRootKey, Arc<RevisionRootPage>> for RevisionRootCache {
    fn get(&self, key: &RevisionRootKey) -> Option<Arc<RevisionRootPage>> {
        self.inner.get(key)
    }

    fn get_with_loader(
        &self,
        key: RevisionRootKey,
        loader: &dyn Fn(&RevisionRootKey) -> Result<Arc<RevisionRootPage>>,
    ) -> Result<Arc<RevisionRootPage>> {
        self.inner.get_with_loader(key, &|key| {
            let root = loader(key)?;
            root.unswizzle_nested();
            Ok(root)
        })
    }

    fn put(&self, key: RevisionRootKey, value: Arc<RevisionRootPage>) {
        value.unswizzle_nested();
        self.inner.put(key, value)
    }

    fn put_if_absent(
        &self,
        key: RevisionRootKey,
        value: Arc<RevisionRootPage>,
    ) -> Option<Arc<RevisionRootPage>> {
        value.unswizzle_nested();
        self.inner.put_if_absent(key, value)
    }

    fn remove(&self, key: &RevisionRootKey) -> Option<Arc<RevisionRootPage>> {
        self.inner.remove(key)
    }

    fn clear(&self) {
        self.inner.clear()
    }

    fn close(&self) {
        self.inner.close()
    }

    fn clean_up(&self) {
        self.inner.clean_up()
    }
}

// ============================================================================
// Red-Black Index-Node Cache
// ============================================================================

/// Cache of red-black index nodes.
///
/// The removal hook unlinks an evicted node from its parent's child slot so
/// eviction actually frees the subtree instead of leaving it reachable.
pub struct IndexNodeCache {
    inner: WeightedCache<IndexLogKey, Arc<IndexNode>>,
}

impl IndexNodeCache {
    pub fn new(max_weight: usize) -> Self {
        let inner = WeightedCache::with_weigher(max_weight, |_, node: &Arc<IndexNode>| {
            node.byte_weight()
        })
        .with_removal_listener(|_, node: &Arc<IndexNode>, _| {
            node.unlink_from_parent();
        });
        Self { inner }
    }

    pub fn invalidate_matching(&self, predicate: &dyn Fn(&IndexLogKey) -> bool) -> usize {
        self.inner.invalidate_matching(predicate)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.stats()
    }
}

impl Cache<IndexLogKey, Arc<IndexNode>> for IndexNodeCache {
    fn get(&self, key: &IndexLogKey) -> Option<Arc<IndexNode>> {
        self.inner.get(key)
    }

    fn get_with_loader(
        &self,
        key: IndexLogKey,
        loader: &dyn Fn(&IndexLogKey) -> Result<Arc<IndexNode>>,
    ) -> Result<Arc<IndexNode>> {
        self.inner.get_with_loader(key, loader)
    }

    fn put(&self, key: IndexLogKey, value: Arc<IndexNode>) {
        self.inner.put(key, value)
    }

    fn put_if_absent(&self, key: IndexLogKey, value: Arc<IndexNode>) -> Option<Arc<IndexNode>> {
        self.inner.put_if_absent(key, value)
    }

    fn remove(&self, key: &IndexLogKey) -> Option<Arc<IndexNode>> {
        self.inner.remove(key)
    }

    fn clear(&self) {
        self.inner.clear()
    }

    fn close(&self) {
        self.inner.close()
    }

    fn clean_up(&self) {
        self.inner.clean_up()
    }
}

// ============================================================================
// Names Cache
// ============================================================================

/// Cache of interned-name tables keyed by (database, resource, revision,
/// index number).
pub struct NamesCache {
    inner: WeightedCache<NamesCacheKey, Arc<NameTable>>,
}

impl NamesCache {
    pub fn new(max_weight: usize) -> Self {
        Self {
            inner: WeightedCache::with_weigher(max_weight, |_, table: &Arc<NameTable>| {
                table.byte_weight().max(1)
            }),
        }
    }

    pub fn invalidate_matching(&self, predicate: &dyn Fn(&NamesCacheKey) -> bool) -> usize {
        self.inner.invalidate_matching(predicate)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.stats()
    }
}

impl Cache<NamesCacheKey, Arc<NameTable>> for NamesCache {
    fn get(&self, key: &NamesCacheKey) -> Option<Arc<NameTable>> {
        self.inner.get(key)
    }

    fn get_with_loader(
        &self,
        key: NamesCacheKey,
        loader: &dyn Fn(&NamesCacheKey) -> Result<Arc<NameTable>>,
    ) -> Result<Arc<NameTable>> {
        self.inner.get_with_loader(key, loader)
    }

    fn put(&self, key: NamesCacheKey, value: Arc<NameTable>) {
        self.inner.put(key, value)
    }

    fn put_if_absent(&self, key: NamesCacheKey, value: Arc<NameTable>) -> Option<Arc<NameTable>> {
        self.inner.put_if_absent(key, value)
    }

    fn remove(&self, key: &NamesCacheKey) -> Option<Arc<NameTable>> {
        self.inner.remove(key)
    }

    fn clear(&self) {
        self.inner.clear()
    }

    fn close(&self) {
        self.inner.close()
    }

    fn clean_up(&self) {
        self.inner.clean_up()
    }
}

// ============================================================================
// Path-Summary Cache
// ============================================================================

/// Cache of path-summary records keyed by (database, resource, path node).
pub struct PathSummaryCache {
    inner: WeightedCache<PathSummaryKey, Arc<PathSummaryNode>>,
}

impl PathSummaryCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            inner: WeightedCache::new(max_entries),
        }
    }

    pub fn invalidate_matching(&self, predicate: &dyn Fn(&PathSummaryKey) -> bool) -> usize {
        self.inner.invalidate_matching(predicate)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.stats()
    }
}

impl Cache<PathSummaryKey, Arc<PathSummaryNode>> for PathSummaryCache {
    fn get(&self, key: &PathSummaryKey) -> Option<Arc<PathSummaryNode>> {
        self.inner.get(key)
    }

    fn get_with_loader(
        &self,
        key: PathSummaryKey,
        loader: &dyn Fn(&PathSummaryKey) -> Result<Arc<PathSummaryNode>>,
    ) -> Result<Arc<PathSummaryNode>> {
        self.inner.get_with_loader(key, loader)
    }

    fn put(&self, key: PathSummaryKey, value: Arc<PathSummaryNode>) {
        self.inner.put(key, value)
    }

    fn put_if_absent(
        &self,
        key: PathSummaryKey,
        value: Arc<PathSummaryNode>,
    ) -> Option<Arc<PathSummaryNode>> {
        self.inner.put_if_absent(key, value)
    }

    fn remove(&self, key: &PathSummaryKey) -> Option<Arc<PathSummaryNode>> {
        self.inner.remove(key)
    }

    fn clear(&self) {
        self.inner.clear()
    }

    fn close(&self) {
        self.inner.close()
    }

    fn clean_up(&self) {
        self.inner.clean_up()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::IndexKind;
    use crate::layout::slot::FixedSlotSerializer;
    use crate::memory::{AllocatorConfig, SegmentAllocator};
    use crate::page::frame::KeyValueLeafPage;
    use crate::page::reference::PageReference;
    use bytes::Bytes;

    fn page_ref_key(key: i64) -> PageRefKey {
        PageRefKey {
            database_id: 1,
            resource_id: 10,
            key,
        }
    }

    fn revision_root_with_swizzled_refs(
        allocator: &Arc<SegmentAllocator>,
    ) -> (Arc<RevisionRootPage>, Arc<KeyValueLeafPage>) {
        let name_ref = Arc::new(PageReference::new(1, 10, 1));
        let slots = allocator.allocate(4 * 1024).unwrap();
        let frame = Arc::new(KeyValueLeafPage::new(
            1,
            3,
            IndexKind::Name,
            1,
            10,
            slots,
            None,
            Arc::new(FixedSlotSerializer),
            allocator.clone(),
        ));
        name_ref.swizzle(&frame);

        let root = Arc::new(RevisionRootPage::new(
            3,
            100,
            name_ref,
            Arc::new(PageReference::new(1, 10, 2)),
            Arc::new(PageReference::new(1, 10, 3)),
            Arc::new(PageReference::new(1, 10, 4)),
            Arc::new(PageReference::new(1, 10, 5)),
            Vec::new(),
        ));
        (root, frame)
    }

    #[test]
    fn test_generic_cache_rejects_frames() {
        let allocator = Arc::new(
            SegmentAllocator::new(AllocatorConfig {
                max_physical_bytes: 1024 * 1024,
                segments_per_class: 8,
            })
            .unwrap(),
        );
        let cache = GenericPageCache::new(10);

        let slots = allocator.allocate(4 * 1024).unwrap();
        let frame = Arc::new(KeyValueLeafPage::new(
            7,
            1,
            IndexKind::Document,
            1,
            10,
            slots,
            None,
            Arc::new(FixedSlotSerializer),
            allocator.clone(),
        ));

        let err = cache
            .try_put(page_ref_key(7), IndexedPage::KeyValueLeaf(frame))
            .unwrap_err();
        assert!(matches!(err, DbError::InvalidArgument(_)));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_generic_cache_accepts_index_pages() {
        let allocator = Arc::new(
            SegmentAllocator::new(AllocatorConfig {
                max_physical_bytes: 1024 * 1024,
                segments_per_class: 8,
            })
            .unwrap(),
        );
        let cache = GenericPageCache::new(10);
        let (root, _frame) = revision_root_with_swizzled_refs(&allocator);

        cache
            .try_put(page_ref_key(0), IndexedPage::RevisionRoot(root))
            .unwrap();
        assert_eq!(cache.len(), 1);
        assert!(cache.get(&page_ref_key(0)).is_some());
    }

    #[test]
    fn test_revision_root_cache_unswizzles_on_insert() {
        let allocator = Arc::new(
            SegmentAllocator::new(AllocatorConfig {
                max_physical_bytes: 1024 * 1024,
                segments_per_class: 8,
            })
            .unwrap(),
        );
        let cache = RevisionRootCache::new(10);
        let (root, _frame) = revision_root_with_swizzled_refs(&allocator);
        assert!(root.name_page().swizzled().is_some());

        cache.put(
            RevisionRootKey {
                database_id: 1,
                resource_id: 10,
                revision: 3,
            },
            root.clone(),
        );

        // The cached root no longer pins the name-page frame.
        assert!(root.name_page().swizzled().is_none());
    }

    #[test]
    fn test_index_node_cache_unlinks_on_eviction() {
        let cache = IndexNodeCache::new(1);

        let parent = IndexNode::new(10, Bytes::from_static(b"parent"));
        let child = IndexNode::new(5, Bytes::from_static(b"child"));
        parent.set_left(Some(child.clone()));

        let key = |node_key: i64| IndexLogKey {
            database_id: 1,
            resource_id: 10,
            node_key,
            revision: 1,
            index_kind: IndexKind::Cas,
            index_number: 0,
        };

        // Tiny weight budget: inserting the parent evicts the child.
        cache.put(key(5), child.clone());
        cache.put(key(10), parent.clone());
        cache.clean_up();

        assert!(parent.left().is_none());
        assert!(child.parent().is_none());
    }

    #[test]
    fn test_names_cache_weighted_by_table_size() {
        let cache = NamesCache::new(64);

        let mut entries = std::collections::HashMap::new();
        entries.insert(1u32, "a".repeat(40));
        cache.put(
            NamesCacheKey {
                database_id: 1,
                resource_id: 10,
                revision: 1,
                index_number: 0,
            },
            Arc::new(NameTable::new(entries)),
        );

        let mut entries = std::collections::HashMap::new();
        entries.insert(2u32, "b".repeat(40));
        cache.put(
            NamesCacheKey {
                database_id: 1,
                resource_id: 10,
                revision: 2,
                index_number: 0,
            },
            Arc::new(NameTable::new(entries)),
        );
        cache.clean_up();

        // Both tables cannot fit under the 64-byte budget.
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_path_summary_scoped_invalidation() {
        let cache = PathSummaryCache::new(100);
        for (db, path_key) in [(1u32, 1i64), (1, 2), (2, 3)] {
            cache.put(
                PathSummaryKey {
                    database_id: db,
                    resource_id: 10,
                    path_node_key: path_key,
                },
                Arc::new(PathSummaryNode {
                    path_node_key: path_key,
                    parent_key: 0,
                    name: "p".into(),
                    level: 1,
                }),
            );
        }

        use crate::cache::keys::ScopedKey;
        let removed = cache.invalidate_matching(&|key| key.in_database(1));
        cache.clean_up();

        assert_eq!(removed, 2);
        assert_eq!(cache.len(), 1);
    }
}
