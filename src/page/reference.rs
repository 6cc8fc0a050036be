// # Page Reference
//
// The identity-and-address object used to key the page caches. A reference
// carries a weak, non-authoritative pointer to the currently materialised
// frame (the "swizzled" slot); ownership always flows cache-or-log -> frame
// -> segment, never through references.

use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::common::{DatabaseId, PageKey, ResourceId, NULL_PAGE_KEY};
use crate::page::frame::KeyValueLeafPage;

/// Sentinel for "not in any intent log"
const NULL_LOG_KEY: usize = usize::MAX;

/// Immutable snapshot of a reference's identity, used as the cache key.
///
/// The snapshot stays consistent while mapped because the only mutation of a
/// reference's page key (intent-log adoption) removes the reference from
/// every cache first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageRefKey {
    pub database_id: DatabaseId,
    pub resource_id: ResourceId,
    pub key: PageKey,
}

/// The canonical key object for the page caches.
pub struct PageReference {
    database_id: DatabaseId,
    resource_id: ResourceId,
    key: AtomicI64,
    log_key: AtomicUsize,
    fragments: Mutex<Vec<PageRefKey>>,
    page: Mutex<Weak<KeyValueLeafPage>>,
}

impl PageReference {
    pub fn new(database_id: DatabaseId, resource_id: ResourceId, key: PageKey) -> Self {
        Self {
            database_id,
            resource_id,
            key: AtomicI64::new(key),
            log_key: AtomicUsize::new(NULL_LOG_KEY),
            fragments: Mutex::new(Vec::new()),
            page: Mutex::new(Weak::new()),
        }
    }

    /// A reference that does not point at any page yet.
    pub fn null(database_id: DatabaseId, resource_id: ResourceId) -> Self {
        Self::new(database_id, resource_id, NULL_PAGE_KEY)
    }

    #[inline(always)]
    pub fn database_id(&self) -> DatabaseId {
        self.database_id
    }

    #[inline(always)]
    pub fn resource_id(&self) -> ResourceId {
        self.resource_id
    }

    #[inline(always)]
    pub fn key(&self) -> PageKey {
        self.key.load(Ordering::Acquire)
    }

    pub fn set_key(&self, key: PageKey) {
        self.key.store(key, Ordering::Release);
    }

    /// Reset the key to the null sentinel (intent-log adoption).
    pub fn clear_key(&self) {
        self.key.store(NULL_PAGE_KEY, Ordering::Release);
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        self.key() == NULL_PAGE_KEY
    }

    /// Snapshot of (database, resource, key) used to address the caches.
    #[inline]
    pub fn cache_key(&self) -> PageRefKey {
        PageRefKey {
            database_id: self.database_id,
            resource_id: self.resource_id,
            key: self.key(),
        }
    }

    // ------------------------------------------------------------------
    // Intent-log slot
    // ------------------------------------------------------------------

    pub fn log_key(&self) -> Option<usize> {
        let index = self.log_key.load(Ordering::Acquire);
        (index != NULL_LOG_KEY).then_some(index)
    }

    pub fn set_log_key(&self, index: usize) {
        self.log_key.store(index, Ordering::Release);
    }

    pub fn clear_log_key(&self) {
        self.log_key.store(NULL_LOG_KEY, Ordering::Release);
    }

    // ------------------------------------------------------------------
    // Page fragments
    // ------------------------------------------------------------------

    /// Record an older page fragment that combines into this page on load.
    pub fn add_fragment(&self, fragment: PageRefKey) {
        self.fragments.lock().push(fragment);
    }

    pub fn fragment_keys(&self) -> Vec<PageRefKey> {
        self.fragments.lock().clone()
    }

    // ------------------------------------------------------------------
    // Swizzled page slot
    // ------------------------------------------------------------------

    /// Point the reference at the currently materialised frame. The slot is
    /// weak: some cache or intent log owns the frame, never the reference.
    pub fn swizzle(&self, frame: &Arc<KeyValueLeafPage>) {
        *self.page.lock() = Arc::downgrade(frame);
    }

    /// The swizzled frame, if it is still alive. A hint only; after eviction
    /// or logging the frame behind a stale hint fails the guard's version
    /// check.
    pub fn swizzled(&self) -> Option<Arc<KeyValueLeafPage>> {
        self.page.lock().upgrade()
    }

    /// Null the page slot.
    pub fn unswizzle(&self) {
        *self.page.lock() = Weak::new();
    }
}

impl PartialEq for PageReference {
    fn eq(&self, other: &Self) -> bool {
        self.database_id == other.database_id
            && self.resource_id == other.resource_id
            && self.key() == other.key()
    }
}

impl Eq for PageReference {}

impl std::fmt::Debug for PageReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageReference")
            .field("database_id", &self.database_id)
            .field("resource_id", &self.resource_id)
            .field("key", &self.key())
            .field("log_key", &self.log_key())
            .field("swizzled", &self.page.lock().upgrade().is_some())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
