// # Memory Management Module
//
// Off-heap memory for page frames. One virtual region is reserved per
// segment size class at startup; physical pages are only committed when a
// segment is first written to and are returned to the operating system with
// "don't need" advice when the segment goes back to the free pool.

pub mod allocator;
pub mod os;
pub mod segment;

pub use allocator::{AllocatorConfig, AllocatorStats, SegmentAllocator};
pub use segment::{MemorySegment, MAX_SEGMENT_SIZE, MIN_SEGMENT_SIZE, SIZE_CLASS_COUNT};
