//! Pass 1: claim every segment's address range with zero pages

use std::{fs::File, io, path::Path};

use crate::{
    error::{AttachError, Result},
    layout::SegmentDescriptor,
    mapping::{map_at, page_size, Access, MappingGuard, Sharing},
};

/// Reject ranges the kernel could never place at their recorded address
///
/// A zero or unaligned base, or a range overlapping an earlier segment, can
/// never land where requested and is reported as an address mismatch without
/// touching the address space. A range that wraps is an impossible layout.
pub fn validate_segments(segments: &[SegmentDescriptor]) -> Result<()> {
    let page = page_size();

    for seg in segments {
        if seg.virt_addr.checked_add(seg.len).is_none() {
            return Err(AttachError::invalid_layout(format!(
                "segment {} of {:#x} bytes wraps the address space",
                seg.index, seg.len
            )));
        }
        if seg.virt_addr == 0 || seg.virt_addr % page != 0 {
            log::error!("segment {} starts at unaligned address {:#x}", seg.index, seg.virt_addr);
            return Err(AttachError::address_denied(
                seg.virt_addr,
                io::Error::from_raw_os_error(libc::EINVAL),
            ));
        }
    }

    let mut sorted: Vec<_> = segments.iter().collect();
    sorted.sort_by_key(|seg| seg.virt_addr);
    for pair in sorted.windows(2) {
        if pair[0].end() > pair[1].virt_addr {
            log::error!("segments {} and {} overlap", pair[0].index, pair[1].index);
            return Err(AttachError::address_denied(
                pair[1].virt_addr,
                io::Error::from_raw_os_error(libc::EEXIST),
            ));
        }
    }

    Ok(())
}

/// Address ranges claimed for every segment, released on drop
#[derive(Debug)]
pub struct ReservedSegments {
    pub(super) reservations: Vec<(SegmentDescriptor, MappingGuard)>,
}

impl ReservedSegments {
    /// Reserve each segment's range at its exact address, in table order
    ///
    /// If any range cannot be claimed, every reservation made so far is
    /// released before the error is returned.
    pub fn reserve(segments: &[SegmentDescriptor], zero_device: &Path) -> Result<Self> {
        validate_segments(segments)?;

        let zero = File::open(zero_device).map_err(|e| {
            AttachError::map_failed(format!("cannot open {}", zero_device.display()), e)
        })?;

        let mut reservations = Vec::with_capacity(segments.len());
        for seg in segments {
            let guard = map_at(seg.virt_addr, seg.len, Access::ReadOnly, Sharing::Private, &zero)
                .map_err(|e| {
                    log::error!(
                        "could not reserve {:#x} bytes at {:#x} for segment {}: {}",
                        seg.len,
                        seg.virt_addr,
                        seg.index,
                        e
                    );
                    e
                })?;
            reservations.push((*seg, guard));
        }

        log::debug!("reserved {} segments", reservations.len());
        Ok(Self { reservations })
    }

    pub fn len(&self) -> usize {
        self.reservations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reservations.is_empty()
    }

    pub fn segments(&self) -> impl Iterator<Item = &SegmentDescriptor> {
        self.reservations.iter().map(|(seg, _)| seg)
    }
}
