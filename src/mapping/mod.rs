//! Memory-mapping primitives
//!
//! All raw `mmap`/`munmap` calls of the crate live here. Mappings at an
//! OS-chosen address go through `memmap2`; fixed-address mappings go through
//! [`map_at`] and are owned by a [`MappingGuard`] until persisted.

pub mod primitives;

pub use primitives::{map_at, page_size, Access, MappingGuard, PersistentMapping, Sharing};
