//! Segment reconstruction
//!
//! Two passes over the segment table:
//! 1. [`ReservedSegments::reserve`] claims every range with `/dev/zero`
//!    so nothing else lands there in the meantime.
//! 2. [`ReservedSegments::map_hugepages`] swaps each reservation for the
//!    hugepage files listed in the table, segment by segment.

pub mod hugepages;
pub mod reserve;

pub use hugepages::{HugepageTableFile, MappedSegment};
pub use reserve::{validate_segments, ReservedSegments};

use crate::{attach::SharedConfig, config::AttachConfig, error::Result};

/// Rebuild every segment described by `shared` at the primary's addresses
pub fn reconstruct_segments(shared: &SharedConfig, config: &AttachConfig) -> Result<Vec<MappedSegment>> {
    let segments = shared.segments();
    let reserved = ReservedSegments::reserve(&segments, &config.zero_device)?;
    let table_file = HugepageTableFile::open(&config.hugepage_path)?;
    reserved.map_hugepages(&table_file)
}
