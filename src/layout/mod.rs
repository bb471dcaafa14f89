//! Frozen binary layout shared with the primary process
//!
//! The primary writes two files:
//! 1. The shared config: one [`MemConfig`] (packed, 208420 bytes)
//! 2. The hugepage table: a flat array of [`HugepageRecord`] (4144 bytes each)
//!
//! Field offsets are checked at compile time so the layout cannot drift.

pub mod constants;
pub mod headers;
pub mod hugepage;

pub use constants::*;
pub use headers::{
    MallocHeap, MemConfig, MemSeg, MemZone, RwLockWord, SegmentDescriptor, TailqHead,
    MEM_CONFIG_SIZE,
};
pub use hugepage::{HugepageEntry, HugepageRecord, HugepageTable, HUGEPAGE_RECORD_SIZE};
