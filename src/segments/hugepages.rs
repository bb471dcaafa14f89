//! Pass 2: replace reservations with hugepage-backed mappings

use std::{
    fs::{File, OpenOptions},
    path::Path,
};

use memmap2::{Mmap, MmapOptions};

use crate::{
    error::{AttachError, Result},
    layout::{HugepageTable, SegmentDescriptor, HUGEPAGE_RECORD_SIZE},
    mapping::{map_at, Access, MappingGuard, PersistentMapping, Sharing},
};

use super::reserve::ReservedSegments;

/// The hugepage table file, mapped read-only for the duration of pass 2
#[derive(Debug)]
pub struct HugepageTableFile {
    mmap: Option<Mmap>,
}

impl HugepageTableFile {
    /// Open and map the whole table file
    pub fn open(path: &Path) -> Result<Self> {
        let display = path.display().to_string();
        let file = File::open(path).map_err(|e| AttachError::config_unavailable(&display, e))?;
        let size = file
            .metadata()
            .map_err(|e| AttachError::config_unavailable(&display, e))?
            .len();

        if size % HUGEPAGE_RECORD_SIZE as u64 != 0 {
            log::warn!(
                "{} holds {} trailing bytes that are not a whole record",
                display,
                size % HUGEPAGE_RECORD_SIZE as u64
            );
        }

        let mmap = if size == 0 {
            None
        } else {
            // SAFETY: the table is written once by the primary before readiness.
            Some(
                unsafe { MmapOptions::new().map(&file) }
                    .map_err(|e| AttachError::map_failed(format!("cannot map {}", display), e))?,
            )
        };

        Ok(Self { mmap })
    }

    pub fn table(&self) -> HugepageTable<'_> {
        HugepageTable::new(self.mmap.as_deref().unwrap_or(&[]))
    }
}

/// A segment rebuilt at the primary's address
#[derive(Debug, Clone)]
pub struct MappedSegment {
    descriptor: SegmentDescriptor,
    pieces: Vec<PersistentMapping>,
}

impl MappedSegment {
    pub fn descriptor(&self) -> &SegmentDescriptor {
        &self.descriptor
    }

    pub fn addr(&self) -> usize {
        self.descriptor.virt_addr
    }

    pub fn len(&self) -> usize {
        self.descriptor.len
    }

    pub fn is_empty(&self) -> bool {
        self.descriptor.len == 0
    }

    /// Number of hugepages backing the segment
    pub fn hugepage_count(&self) -> usize {
        self.pieces.len()
    }

    /// Individual hugepage mappings in address order
    pub fn pieces(&self) -> &[PersistentMapping] {
        &self.pieces
    }

    /// Byte view of the whole segment
    ///
    /// # Safety
    /// Other processes write the same memory; the caller must synchronise
    /// with them.
    pub unsafe fn as_slice(&self) -> &[u8] {
        std::slice::from_raw_parts(self.addr() as *const u8, self.len())
    }

    /// Unmap every hugepage of the segment
    ///
    /// # Safety
    /// No pointer into the segment may be used afterwards.
    pub unsafe fn unmap(self) -> Result<()> {
        for piece in self.pieces {
            piece.unmap()?;
        }
        Ok(())
    }
}

struct SegmentPieces {
    descriptor: SegmentDescriptor,
    guards: Vec<MappingGuard>,
}

impl SegmentPieces {
    fn persist(self) -> MappedSegment {
        MappedSegment {
            descriptor: self.descriptor,
            pieces: self.guards.into_iter().map(MappingGuard::persist).collect(),
        }
    }
}

/// Map the hugepages of one segment over its released reservation
fn map_segment(
    seg: &SegmentDescriptor,
    reservation: MappingGuard,
    table: &HugepageTable<'_>,
) -> Result<SegmentPieces> {
    drop(reservation);

    let mut guards = Vec::new();
    let mut offset = 0usize;

    for index in table.indices_for(seg.index) {
        if offset >= seg.len {
            break;
        }
        let record = table
            .record(index)
            .ok_or_else(|| AttachError::invalid_layout(format!("hugepage record {} out of range", index)))?;

        let size = record.size as usize;
        if size == 0 {
            return Err(AttachError::invalid_layout(format!(
                "hugepage record {} of segment {} has zero size",
                index, seg.index
            )));
        }
        if offset + size > seg.len {
            return Err(AttachError::invalid_layout(format!(
                "hugepage {} overruns segment {} ({:#x} + {:#x} > {:#x})",
                record.path().display(),
                seg.index,
                offset,
                size,
                seg.len
            )));
        }

        let path = record.path();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| {
                log::error!("could not open {}", path.display());
                AttachError::backing_file_missing(seg.index, &path.display().to_string(), e)
            })?;

        let guard = map_at(seg.virt_addr + offset, size, Access::ReadWrite, Sharing::Shared, &file)
            .map_err(|e| {
                log::error!("could not mmap {}: {}", path.display(), e);
                e
            })?;
        drop(file);

        log::debug!("mapped {} at {:#x}", path.display(), guard.addr());
        offset += size;
        guards.push(guard);
    }

    if offset < seg.len {
        return Err(AttachError::hugepage_missing(
            seg.index,
            format!("hugepages cover {:#x} of {:#x} bytes", offset, seg.len),
        ));
    }

    log::info!("mapped segment {} of size {:#x}", seg.index, seg.len);
    Ok(SegmentPieces {
        descriptor: *seg,
        guards,
    })
}

impl ReservedSegments {
    /// Replace every reservation with its hugepages, in table order
    ///
    /// On error all mappings made here, the remaining reservations and the
    /// table mapping are released.
    pub fn map_hugepages(self, table_file: &HugepageTableFile) -> Result<Vec<MappedSegment>> {
        let table = table_file.table();
        log::info!("analysing {} hugepage files", table.len());

        let mut completed = Vec::with_capacity(self.reservations.len());
        for (seg, reservation) in self.reservations {
            completed.push(map_segment(&seg, reservation, &table)?);
        }

        Ok(completed.into_iter().map(SegmentPieces::persist).collect())
    }
}
