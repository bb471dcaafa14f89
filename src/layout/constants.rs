//! Constants of the frozen shared layout

/// Magic number written by the primary once the shared config is complete
pub const RTE_MAGIC: u32 = 19820526;

/// Capacity of the segment table
pub const MAX_MEMSEG: usize = 256;

/// Capacity of the memzone table
pub const MAX_MEMZONE: usize = 2560;

/// Number of named tail queues
pub const MAX_TAILQ: usize = 32;

/// Number of per-socket malloc heaps
pub const MAX_NUMA_NODES: usize = 8;

/// Free lists per malloc heap
pub const HEAP_NUM_FREELISTS: usize = 13;

/// Memzone name length, including the terminating NUL
pub const MEMZONE_NAMESIZE: usize = 32;

/// Tail queue name length, including the terminating NUL
pub const TAILQ_NAMESIZE: usize = 32;

/// Backing file path length, including the terminating NUL
pub const MAX_HUGEPAGE_PATH: usize = 4096;

/// Cache line size the malloc heap records are padded to
pub const CACHE_LINE_SIZE: usize = 64;

/// Bits 0-54 of a page-table export entry hold the page frame number
pub const PFN_MASK: u64 = 0x7f_ffff_ffff_ffff;

/// Size of one page-table export entry
pub const PAGEMAP_ENTRY_SIZE: usize = 8;

/// Physical address reported when resolution fails
pub const BAD_PHYS_ADDR: u64 = u64::MAX;
