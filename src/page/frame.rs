// # Page Frame
//
// The value type of the record-page caches. A frame owns one or two memory
// segments (slot area, optional Dewey-ID area) and carries the atomic state
// the eviction protocol runs on: a monotonically increasing version, a guard
// count, a HOT bit for the second-chance clock, and a terminal closed flag.
//
// State transitions observable across threads use acquire-release ordering;
// `close()` publishes the final version before publishing `closed = true` so
// a racing guard holder that reads the version afterwards sees the mismatch.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::common::{DatabaseId, IndexKind, PageKey, ResourceId, Revision};
use crate::layout::slot::RecordSerializer;
use crate::memory::{MemorySegment, SegmentAllocator};

/// Sentinel for "no slot written yet"
const NO_SLOT: i32 = -1;

struct FrameSegments {
    slots: Option<MemorySegment>,
    dewey: Option<MemorySegment>,
}

/// A versioned, reference-counted handle around the segments of one record
/// page.
///
/// Lifecycle: created by the page loader, optionally inserted into a cache,
/// fixed and unfixed by transactions through guards, and finally either
/// evicted by the sweeper or adopted by a transaction intent log. The
/// terminal state is closed: segments are back in the allocator and every
/// further data operation observes an empty frame.
pub struct KeyValueLeafPage {
    page_key: PageKey,
    revision: Revision,
    index_kind: IndexKind,
    database_id: DatabaseId,
    resource_id: ResourceId,

    version: AtomicU64,
    guard_count: AtomicU32,
    hot: AtomicBool,
    closed: AtomicBool,
    close_lock: Mutex<()>,

    data: RwLock<FrameSegments>,
    records: RwLock<HashMap<u64, u32>>,
    last_slot_index: AtomicI32,
    last_dewey_index: AtomicI32,

    serializer: Arc<dyn RecordSerializer>,
    allocator: Arc<SegmentAllocator>,
}

impl KeyValueLeafPage {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        page_key: PageKey,
        revision: Revision,
        index_kind: IndexKind,
        database_id: DatabaseId,
        resource_id: ResourceId,
        slots: MemorySegment,
        dewey: Option<MemorySegment>,
        serializer: Arc<dyn RecordSerializer>,
        allocator: Arc<SegmentAllocator>,
    ) -> Self {
        Self {
            page_key,
            revision,
            index_kind,
            database_id,
            resource_id,
            version: AtomicU64::new(0),
            guard_count: AtomicU32::new(0),
            hot: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            close_lock: Mutex::new(()),
            data: RwLock::new(FrameSegments {
                slots: Some(slots),
                dewey,
            }),
            records: RwLock::new(HashMap::new()),
            last_slot_index: AtomicI32::new(NO_SLOT),
            last_dewey_index: AtomicI32::new(NO_SLOT),
            serializer,
            allocator,
        }
    }

    // ------------------------------------------------------------------
    // Metadata
    // ------------------------------------------------------------------

    #[inline(always)]
    pub fn page_key(&self) -> PageKey {
        self.page_key
    }

    #[inline(always)]
    pub fn revision(&self) -> Revision {
        self.revision
    }

    #[inline(always)]
    pub fn index_kind(&self) -> IndexKind {
        self.index_kind
    }

    #[inline(always)]
    pub fn database_id(&self) -> DatabaseId {
        self.database_id
    }

    #[inline(always)]
    pub fn resource_id(&self) -> ResourceId {
        self.resource_id
    }

    pub fn serializer(&self) -> &Arc<dyn RecordSerializer> {
        &self.serializer
    }

    // ------------------------------------------------------------------
    // Eviction protocol state
    // ------------------------------------------------------------------

    /// Set the HOT bit. Idempotent; called on every cache hit.
    #[inline(always)]
    pub fn mark_accessed(&self) {
        self.hot.store(true, Ordering::Release);
    }

    /// Sweeper only.
    #[inline(always)]
    pub fn is_hot(&self) -> bool {
        self.hot.load(Ordering::Acquire)
    }

    /// Clear the HOT bit and return the previous value. Sweeper only.
    #[inline(always)]
    pub fn clear_hot(&self) -> bool {
        self.hot.swap(false, Ordering::AcqRel)
    }

    /// Current frame version. Incremented once per recycle event.
    #[inline(always)]
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    #[inline(always)]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    #[inline(always)]
    pub fn get_guard_count(&self) -> u32 {
        self.guard_count.load(Ordering::Acquire)
    }

    /// Increment the guard count.
    ///
    /// The raw increment never fails; callers that must not fix a recycled
    /// frame re-check `is_closed()` afterwards (the cache does) or rely on
    /// the version comparison at unfix.
    #[inline(always)]
    pub fn acquire_guard(&self) {
        self.guard_count.fetch_add(1, Ordering::AcqRel);
    }

    /// Decrement the guard count. Underflow is fatal.
    #[inline(always)]
    pub fn release_guard(&self) {
        let old = self.guard_count.fetch_sub(1, Ordering::AcqRel);
        assert!(old > 0, "guard count underflow");
    }

    /// Close the frame: bump the version, return the segments to the
    /// allocator and flip the closed flag.
    ///
    /// No-op if already closed. If guards are live the close is vetoed and
    /// the frame stays open; the caller learns this from a follow-up
    /// `is_closed()` check.
    pub fn close(&self) {
        let _lock = self.close_lock.lock();

        if self.closed.load(Ordering::Acquire) {
            return;
        }
        if self.guard_count.load(Ordering::Acquire) > 0 {
            return;
        }

        // The version must be visible before `closed` so that any racing
        // guard holder observes the mismatch at unfix.
        self.version.fetch_add(1, Ordering::AcqRel);

        {
            let mut data = self.data.write();
            if let Some(segment) = data.slots.take() {
                self.allocator.release(segment);
            }
            if let Some(segment) = data.dewey.take() {
                self.allocator.release(segment);
            }
        }

        self.records.write().clear();
        self.closed.store(true, Ordering::Release);
    }

    /// Force-release every outstanding guard. Shutdown paths only; returns
    /// the number of guards that were still live.
    pub(crate) fn drain_guards(&self) -> u32 {
        self.guard_count.swap(0, Ordering::AcqRel)
    }

    // ------------------------------------------------------------------
    // Segment access
    // ------------------------------------------------------------------

    /// Read access to the slot area. The closure observes `None` once the
    /// frame is closed.
    pub fn with_slot_data<R>(&self, f: impl FnOnce(Option<&[u8]>) -> R) -> R {
        let data = self.data.read();
        f(data.slots.as_ref().map(|segment| segment.as_slice()))
    }

    /// Write access to the slot area, used by the record serializer through
    /// the fixed-slot writer.
    pub fn with_slot_data_mut<R>(&self, f: impl FnOnce(Option<&mut [u8]>) -> R) -> R {
        let mut data = self.data.write();
        f(data.slots.as_mut().map(|segment| segment.as_mut_slice()))
    }

    /// Read access to the optional Dewey-ID area.
    pub fn with_dewey_data<R>(&self, f: impl FnOnce(Option<&[u8]>) -> R) -> R {
        let data = self.data.read();
        f(data.dewey.as_ref().map(|segment| segment.as_slice()))
    }

    pub fn with_dewey_data_mut<R>(&self, f: impl FnOnce(Option<&mut [u8]>) -> R) -> R {
        let mut data = self.data.write();
        f(data.dewey.as_mut().map(|segment| segment.as_mut_slice()))
    }

    /// Sum of the ladder sizes of the owned segments; the record cache's
    /// per-entry weight.
    pub fn byte_weight(&self) -> usize {
        let data = self.data.read();
        data.slots.as_ref().map(|s| s.len()).unwrap_or(0)
            + data.dewey.as_ref().map(|s| s.len()).unwrap_or(0)
    }

    // ------------------------------------------------------------------
    // Record back-map and slot indices
    // ------------------------------------------------------------------

    pub fn set_record_slot(&self, record_key: u64, slot_index: u32) {
        self.records.write().insert(record_key, slot_index);
    }

    pub fn record_slot(&self, record_key: u64) -> Option<u32> {
        self.records.read().get(&record_key).copied()
    }

    pub fn record_count(&self) -> usize {
        self.records.read().len()
    }

    pub fn last_slot_index(&self) -> Option<u32> {
        let index = self.last_slot_index.load(Ordering::Acquire);
        (index != NO_SLOT).then_some(index as u32)
    }

    pub fn set_last_slot_index(&self, index: u32) {
        self.last_slot_index.store(index as i32, Ordering::Release);
    }

    pub fn last_dewey_index(&self) -> Option<u32> {
        let index = self.last_dewey_index.load(Ordering::Acquire);
        (index != NO_SLOT).then_some(index as u32)
    }

    pub fn set_last_dewey_index(&self, index: u32) {
        self.last_dewey_index.store(index as i32, Ordering::Release);
    }
}

impl std::fmt::Debug for KeyValueLeafPage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyValueLeafPage")
            .field("page_key", &self.page_key)
            .field("revision", &self.revision)
            .field("index_kind", &self.index_kind)
            .field("database_id", &self.database_id)
            .field("resource_id", &self.resource_id)
            .field("version", &self.version())
            .field("guard_count", &self.get_guard_count())
            .field("hot", &self.is_hot())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Drop for KeyValueLeafPage {
    fn drop(&mut self) {
        // A frame dropped without close() would leak its charge; close is
        // idempotent and vetoes are impossible here (no guards can outlive
        // every Arc to the frame).
        if !self.is_closed() {
            self.guard_count.store(0, Ordering::Release);
            self.close();
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
