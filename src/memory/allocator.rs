// # Segment Allocator
//
// Hands out fixed-size memory segments from one reserved virtual region per
// ladder class. Physical memory is committed lazily on first touch and given
// back to the operating system with "don't need" advice on release, so the
// configured budget tracks resident pages, not address space.
//
// The borrowed-address set and the physical-bytes counter are the only
// correctness-critical shared state; the per-class free deques are lock-free.

use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam::queue::SegQueue;
use dashmap::DashSet;
use once_cell::sync::OnceCell;
use serde::Serialize;

use crate::error::{DbError, Result};
use crate::memory::os;
use crate::memory::segment::{class_size, size_class_for, MemorySegment, SIZE_CLASS_COUNT};

static GLOBAL: OnceCell<Arc<SegmentAllocator>> = OnceCell::new();

// ============================================================================
// Configuration
// ============================================================================

/// Allocator configuration
#[derive(Debug, Clone)]
pub struct AllocatorConfig {
    /// Budget for resident physical memory across all size classes
    pub max_physical_bytes: u64,

    /// Number of candidate segments partitioned out of each class region
    pub segments_per_class: usize,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            max_physical_bytes: 1024 * 1024 * 1024,
            segments_per_class: 4096,
        }
    }
}

// ============================================================================
// Segment Allocator
// ============================================================================

struct Region {
    base: *mut u8,
    len: usize,
}

// SAFETY: regions are only touched through the allocator's own methods
unsafe impl Send for Region {}
unsafe impl Sync for Region {}

/// Process-wide segment allocator.
///
/// Constructed explicitly and destroyed explicitly; a global handle is
/// published via [`SegmentAllocator::init`]. Frames keep their own `Arc` to
/// the allocator they were served from, so locally constructed instances
/// (e.g. in tests) work exactly like the global one.
pub struct SegmentAllocator {
    regions: Vec<Region>,
    free: [SegQueue<usize>; SIZE_CLASS_COUNT],
    borrowed: DashSet<usize>,
    max_physical_bytes: u64,
    physical_bytes: AtomicU64,
    closed: AtomicBool,
    freed: AtomicBool,

    allocations: AtomicU64,
    releases: AtomicU64,
    double_releases: AtomicU64,
    advice_failures: AtomicU64,
    drift_clamps: AtomicU64,
}

impl SegmentAllocator {
    /// Reserve one virtual region per size class and eagerly partition each
    /// region into candidate segments.
    pub fn new(config: AllocatorConfig) -> Result<Self> {
        if config.segments_per_class == 0 {
            return Err(DbError::InvalidArgument(
                "segments_per_class must be > 0".into(),
            ));
        }

        let free: [SegQueue<usize>; SIZE_CLASS_COUNT] =
            std::array::from_fn(|_| SegQueue::new());
        let mut regions: Vec<Region> = Vec::with_capacity(SIZE_CLASS_COUNT);

        for class in 0..SIZE_CLASS_COUNT {
            let segment_len = class_size(class);
            let region_len = segment_len * config.segments_per_class;
            let base = match os::reserve(region_len) {
                Ok(base) => base,
                Err(e) => {
                    // Roll back regions reserved so far.
                    for region in &regions {
                        let _ = os::unreserve(region.base, region.len);
                    }
                    return Err(e);
                }
            };

            for i in 0..config.segments_per_class {
                free[class].push(base as usize + i * segment_len);
            }

            regions.push(Region {
                base,
                len: region_len,
            });
        }

        Ok(Self {
            regions,
            free,
            borrowed: DashSet::new(),
            max_physical_bytes: config.max_physical_bytes,
            physical_bytes: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            freed: AtomicBool::new(false),
            allocations: AtomicU64::new(0),
            releases: AtomicU64::new(0),
            double_releases: AtomicU64::new(0),
            advice_failures: AtomicU64::new(0),
            drift_clamps: AtomicU64::new(0),
        })
    }

    /// Publish the process-wide allocator. Must be called once at startup.
    pub fn init(config: AllocatorConfig) -> Result<()> {
        let allocator = Arc::new(Self::new(config)?);
        GLOBAL
            .set(allocator)
            .map_err(|_| DbError::InvalidState("segment allocator already initialized".into()))
    }

    /// Handle to the process-wide allocator.
    pub fn global() -> Arc<SegmentAllocator> {
        GLOBAL
            .get()
            .expect("segment allocator not initialized")
            .clone()
    }

    /// Allocate a segment of the smallest ladder size >= `size`.
    ///
    /// The segment's full ladder size is charged against the physical budget
    /// up front; lazily committed pages can never exceed the charge.
    pub fn allocate(&self, size: usize) -> Result<MemorySegment> {
        if self.closed.load(Ordering::Acquire) {
            return Err(DbError::InvalidState("segment allocator is closed".into()));
        }

        let class = size_class_for(size)?;
        let ladder = class_size(class);

        self.charge(ladder as u64)?;

        let addr = match self.free[class].pop() {
            Some(addr) => addr,
            None => {
                self.uncharge(ladder as u64);
                return Err(DbError::OutOfMemory(format!(
                    "size class {} ({} bytes) exhausted",
                    class, ladder
                )));
            }
        };

        if let Err(e) = os::commit(addr as *mut u8, ladder) {
            self.free[class].push(addr);
            self.uncharge(ladder as u64);
            return Err(e);
        }

        self.borrowed.insert(addr);
        self.allocations.fetch_add(1, Ordering::Relaxed);

        let ptr = NonNull::new(addr as *mut u8)
            .ok_or_else(|| DbError::Internal("segment address was null".into()))?;
        Ok(MemorySegment::from_raw(ptr, class))
    }

    /// Return a segment to the free pool.
    ///
    /// Double releases are absorbed and counted. If the "don't need" advice
    /// fails, the segment may still hold physical pages, so it stays marked
    /// borrowed and is not returned to the pool.
    pub fn release(&self, segment: MemorySegment) {
        let addr = segment.addr();
        let ladder = segment.len();

        if self.borrowed.remove(&addr).is_none() {
            self.double_releases.fetch_add(1, Ordering::Relaxed);
            log::warn!(
                "double release of segment at {:#x} ({} bytes) absorbed",
                addr,
                ladder
            );
            return;
        }

        if let Err(e) = os::discard(addr as *mut u8, ladder) {
            self.advice_failures.fetch_add(1, Ordering::Relaxed);
            self.borrowed.insert(addr);
            log::warn!(
                "physical release of segment at {:#x} failed, keeping it borrowed: {}",
                addr,
                e
            );
            return;
        }

        self.uncharge(ladder as u64);
        self.free[segment.size_class()].push(addr);
        self.releases.fetch_add(1, Ordering::Relaxed);
    }

    /// Release the physical pages of a still-borrowed segment without giving
    /// up ownership. The budget charge stays in place.
    pub fn reset(&self, segment: &mut MemorySegment) -> Result<()> {
        os::discard(segment.addr() as *mut u8, segment.len())
    }

    /// Tear the allocator down: drain the free pools and unmap every region.
    ///
    /// All frames must be closed first; segments still borrowed at this point
    /// are leaks and are reported.
    pub fn free(&self) {
        if self.freed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.closed.store(true, Ordering::Release);

        let leaked = self.borrowed.len();
        if leaked > 0 {
            log::warn!("freeing segment allocator with {} segments still borrowed", leaked);
        }

        for queue in &self.free {
            while queue.pop().is_some() {}
        }
        for region in &self.regions {
            if let Err(e) = os::unreserve(region.base, region.len) {
                log::warn!("failed to unmap segment region: {}", e);
            }
        }
    }

    /// Resident bytes currently charged against the budget.
    pub fn physical_bytes(&self) -> u64 {
        self.physical_bytes.load(Ordering::Acquire)
    }

    /// Number of segments currently borrowed by frames.
    pub fn borrowed_segments(&self) -> usize {
        self.borrowed.len()
    }

    pub fn stats(&self) -> AllocatorStats {
        AllocatorStats {
            physical_bytes: self.physical_bytes(),
            max_physical_bytes: self.max_physical_bytes,
            borrowed_segments: self.borrowed.len() as u64,
            allocations: self.allocations.load(Ordering::Relaxed),
            releases: self.releases.load(Ordering::Relaxed),
            double_releases: self.double_releases.load(Ordering::Relaxed),
            advice_failures: self.advice_failures.load(Ordering::Relaxed),
            drift_clamps: self.drift_clamps.load(Ordering::Relaxed),
        }
    }

    fn charge(&self, bytes: u64) -> Result<()> {
        let max = self.max_physical_bytes;
        self.physical_bytes
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                let next = current + bytes;
                if next > max {
                    None
                } else {
                    Some(next)
                }
            })
            .map(|_| ())
            .map_err(|current| {
                DbError::OutOfMemory(format!(
                    "physical budget exhausted: {} + {} > {}",
                    current, bytes, max
                ))
            })
    }

    fn uncharge(&self, bytes: u64) {
        let result = self
            .physical_bytes
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                current.checked_sub(bytes)
            });
        if result.is_err() {
            // Accounting drift: clamp instead of wrapping below zero.
            self.drift_clamps.fetch_add(1, Ordering::Relaxed);
            self.physical_bytes.store(0, Ordering::Release);
            log::warn!("physical-bytes counter would have gone negative, clamped to zero");
        }
    }
}

impl Drop for SegmentAllocator {
    fn drop(&mut self) {
        if !self.freed.load(Ordering::Acquire) {
            self.free();
        }
    }
}

/// Point-in-time allocator statistics
#[derive(Debug, Clone, Serialize)]
pub struct AllocatorStats {
    pub physical_bytes: u64,
    pub max_physical_bytes: u64,
    pub borrowed_segments: u64,
    pub allocations: u64,
    pub releases: u64,
    pub double_releases: u64,
    pub advice_failures: u64,
    pub drift_clamps: u64,
}

// ============================================================================
// Tests
// ============================================================================
