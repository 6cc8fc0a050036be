// # Page Guard
//
// Scoped acquisition of a page frame. Fixing a guard captures the frame's
// version and bumps its guard count; unfixing releases the count and compares
// versions. A mismatch means the frame was recycled underneath the reader and
// surfaces as `FrameReused`, the only retryable error in the system.
//
// Readers pay two atomic operations and no locks; eviction proceeds whenever
// no guards are live without coordinating with readers.

use std::sync::Arc;

use crate::error::{DbError, Result};
use crate::page::frame::KeyValueLeafPage;
use crate::page::reference::PageReference;

/// A scoped, consume-once guard on a page frame.
///
/// While the guard is live the sweeper will not evict the frame. Unfix (or
/// drop) releases the guard; an explicit [`PageGuard::unfix`] additionally
/// reports [`DbError::FrameReused`] when the frame's version moved, telling
/// the caller to retry its lookup.
pub struct PageGuard {
    reference: Arc<PageReference>,
    frame: Arc<KeyValueLeafPage>,
    version_at_fix: u64,
    poisoned: bool,
    released: bool,
}

impl PageGuard {
    /// Fix a guard on `frame`.
    ///
    /// The fix itself never fails: a guard taken from a stale swizzled hint
    /// during a concurrent eviction is detected at unfix time instead. A fix
    /// that observes an already-closed frame is poisoned immediately, so it
    /// can never report success for a page that was evicted beforehand.
    pub fn fix(reference: Arc<PageReference>, frame: Arc<KeyValueLeafPage>) -> Self {
        let version_at_fix = frame.version();
        frame.acquire_guard();
        let poisoned = frame.is_closed();
        Self {
            reference,
            frame,
            version_at_fix,
            poisoned,
            released: false,
        }
    }

    #[inline(always)]
    pub fn frame(&self) -> &Arc<KeyValueLeafPage> {
        &self.frame
    }

    #[inline(always)]
    pub fn reference(&self) -> &Arc<PageReference> {
        &self.reference
    }

    #[inline(always)]
    pub fn version_at_fix(&self) -> u64 {
        self.version_at_fix
    }

    /// Release the guard and validate the optimistic read.
    pub fn unfix(mut self) -> Result<()> {
        self.release_inner()
    }

    fn release_inner(&mut self) -> Result<()> {
        if self.released {
            return Err(DbError::InvalidState("page guard released twice".into()));
        }
        self.released = true;
        self.frame.release_guard();

        if self.poisoned || self.frame.version() != self.version_at_fix {
            return Err(DbError::FrameReused);
        }
        Ok(())
    }
}

impl Drop for PageGuard {
    fn drop(&mut self) {
        if !self.released {
            self.released = true;
            self.frame.release_guard();
            if self.poisoned || self.frame.version() != self.version_at_fix {
                // Nothing to propagate out of a drop; the reader that cares
                // calls unfix() and observes FrameReused there.
                log::debug!(
                    "guard on page {} dropped after frame reuse",
                    self.frame.page_key()
                );
            }
        }
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

    fn fixture() -> (Arc<SegmentAllocator>, Arc<PageReference>, Arc<KeyValueLeafPage>) {
        let allocator = Arc::new(
            SegmentAllocator::new(AllocatorConfig {
                max_physical_bytes: 1024 * 1024,
                segments_per_class: 8,
            })
            .unwrap(),
        );
        let reference = Arc::new(PageReference::new(1, 10, 7));
        let slots = allocator.allocate(4 * 1024).unwrap();
        let frame = Arc::new(KeyValueLeafPage::new(
            7,
            3,
            IndexKind::Document,
            1,
            10,
            slots,
            None,
            Arc::new(FixedSlotSerializer),
            allocator.clone(),
        ));
        (allocator, reference, frame)
    }

    #[test]
    fn test_guard_holds_and_releases_count() {
        let (_allocator, reference, frame) = fixture();

        let guard = PageGuard::fix(reference, frame.clone());
        assert_eq!(frame.get_guard_count(), 1);
        guard.unfix().unwrap();
        assert_eq!(frame.get_guard_count(), 0);
    }

    #[test]
    fn test_unfix_detects_reuse() {
        let (_allocator, reference, frame) = fixture();

        // The guard is fixed from a stale hint: the version is captured
        // before the frame gets recycled.
        let version_before = frame.version();
        frame.close();
        assert_ne!(frame.version(), version_before);

        let mut guard = PageGuard::fix(reference, frame.clone());
        guard.version_at_fix = version_before;

        let err = guard.unfix().unwrap_err();
        assert!(matches!(err, DbError::FrameReused));
        assert_eq!(frame.get_guard_count(), 0);
    }

    #[test]
    fn test_fix_on_evicted_frame_is_poisoned() {
        let (_allocator, reference, frame) = fixture();

        frame.close();
        assert!(frame.is_closed());

        // Fixing from a stale hint after eviction can never succeed.
        let guard = PageGuard::fix(reference, frame.clone());
        let err = guard.unfix().unwrap_err();
        assert!(matches!(err, DbError::FrameReused));
    }

    #[test]
    fn test_drop_releases_guard() {
        let (_allocator, reference, frame) = fixture();

        {
            let _guard = PageGuard::fix(reference, frame.clone());
            assert_eq!(frame.get_guard_count(), 1);
        }
        assert_eq!(frame.get_guard_count(), 0);
    }

    #[test]
    fn test_guard_survives_sweep_free_interval() {
        let (_allocator, reference, frame) = fixture();

        let guard = PageGuard::fix(reference, frame.clone());
        // Eviction attempts while the guard is live are vetoed, so the
        // version cannot move and unfix succeeds.
        frame.close();
        assert!(!frame.is_closed());
        guard.unfix().unwrap();
    }
}
