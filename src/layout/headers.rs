//! Packed structures of the shared control file
//!
//! Every type here is `#[repr(C, packed)]`, so its alignment is 1 and a
//! `&MemConfig` can be taken over any mapped byte range of the right length.
//! Multi-byte fields must be copied out by value, never borrowed.

use std::mem::{offset_of, size_of};

use serde::{Deserialize, Serialize};

use super::constants::*;

/// Reader/writer lock word (-1 when write-held, >0 when read-held)
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, Default)]
pub struct RwLockWord {
    pub cnt: i32,
}

/// Physical memory segment descriptor
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, Default)]
pub struct MemSeg {
    /// Start physical address
    pub phys_addr: u64,
    /// Start virtual address in the primary
    pub addr: u64,
    /// Length in bytes
    pub len: u64,
    /// Page size of the underlying memory
    pub hugepage_sz: u64,
    /// NUMA socket id
    pub socket_id: i32,
    /// Number of memory channels
    pub nchannel: u32,
    /// Number of memory ranks
    pub nrank: u32,
}

impl MemSeg {
    /// Build a descriptor for a segment at `addr` of `len` bytes
    pub fn new(addr: u64, phys_addr: u64, len: u64, hugepage_sz: u64, socket_id: i32) -> Self {
        Self {
            phys_addr,
            addr,
            len,
            hugepage_sz,
            socket_id,
            nchannel: 0,
            nrank: 0,
        }
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn addr(&self) -> u64 {
        self.addr
    }
}

/// Named portion of a segment
#[repr(C, packed)]
#[derive(Debug, Clone, Copy)]
pub struct MemZone {
    pub name: [u8; MEMZONE_NAMESIZE],
    pub phys_addr: u64,
    pub addr: u64,
    pub len: u64,
    pub hugepage_sz: u64,
    pub socket_id: i32,
    pub flags: u32,
    pub memseg_id: u32,
}

/// Head of a named tail queue stored in shared memory
#[repr(C, packed)]
#[derive(Debug, Clone, Copy)]
pub struct TailqHead {
    pub tqh_first: u64,
    pub tqh_last: u64,
    pub name: [u8; TAILQ_NAMESIZE],
}

/// Per-socket malloc heap, padded to two cache lines
#[repr(C, packed)]
#[derive(Debug, Clone, Copy)]
pub struct MallocHeap {
    pub lock: i32,
    _pad0: [u8; 4],
    pub free_head: [u64; HEAP_NUM_FREELISTS],
    pub alloc_count: u32,
    _pad1: [u8; 4],
    pub total_size: u64,
}

/// Shared memory configuration written by the primary process
#[repr(C, packed)]
pub struct MemConfig {
    /// Readiness sentinel, equals [`RTE_MAGIC`] once the primary is done
    pub magic: u32,
    pub nchannel: u32,
    pub nrank: u32,
    pub mlock: RwLockWord,
    pub qlock: RwLockWord,
    pub mplock: RwLockWord,
    pub memzone_cnt: u32,
    /// Segment table, terminated by the first zero-length entry
    pub memseg: [MemSeg; MAX_MEMSEG],
    pub memzone: [MemZone; MAX_MEMZONE],
    pub tailq_head: [TailqHead; MAX_TAILQ],
    pub malloc_heaps: [MallocHeap; MAX_NUMA_NODES],
    /// Address at which the primary mapped this structure
    pub mem_cfg_addr: u64,
}

/// Size of the shared config file contents
pub const MEM_CONFIG_SIZE: usize = size_of::<MemConfig>();

const _: () = {
    assert!(size_of::<MemSeg>() == 44);
    assert!(size_of::<MemZone>() == 76);
    assert!(size_of::<TailqHead>() == 48);
    assert!(size_of::<MallocHeap>() == 2 * CACHE_LINE_SIZE);
    assert!(offset_of!(MemConfig, magic) == 0);
    assert!(offset_of!(MemConfig, memzone_cnt) == 24);
    assert!(offset_of!(MemConfig, memseg) == 28);
    assert!(offset_of!(MemConfig, memzone) == 11292);
    assert!(offset_of!(MemConfig, tailq_head) == 205852);
    assert!(offset_of!(MemConfig, malloc_heaps) == 207388);
    assert!(offset_of!(MemConfig, mem_cfg_addr) == 208412);
    assert!(MEM_CONFIG_SIZE == 208420);
};

impl MemConfig {
    /// Allocate an all-zero config on the heap
    pub fn new_boxed() -> Box<Self> {
        let layout = std::alloc::Layout::new::<Self>();
        // SAFETY: every field is an integer or byte array, so all-zero is valid.
        unsafe {
            let ptr = std::alloc::alloc_zeroed(layout) as *mut Self;
            if ptr.is_null() {
                std::alloc::handle_alloc_error(layout);
            }
            Box::from_raw(ptr)
        }
    }

    /// View a byte buffer as a config
    ///
    /// Returns `None` if the buffer is shorter than [`MEM_CONFIG_SIZE`].
    pub fn from_bytes(bytes: &[u8]) -> Option<&Self> {
        if bytes.len() < MEM_CONFIG_SIZE {
            return None;
        }
        // SAFETY: alignment is 1, length checked, any bit pattern is valid.
        Some(unsafe { &*(bytes.as_ptr() as *const Self) })
    }

    /// Raw bytes in the frozen wire format
    pub fn as_bytes(&self) -> &[u8] {
        // SAFETY: packed with no implicit padding.
        unsafe { std::slice::from_raw_parts(self as *const Self as *const u8, MEM_CONFIG_SIZE) }
    }

    pub fn magic(&self) -> u32 {
        self.magic
    }

    pub fn self_address(&self) -> u64 {
        self.mem_cfg_addr
    }

    /// Copy of segment descriptor `index`
    pub fn segment(&self, index: usize) -> MemSeg {
        self.memseg[index]
    }

    /// Overwrite segment descriptor `index`
    pub fn set_segment(&mut self, index: usize, seg: MemSeg) {
        self.memseg[index] = seg;
    }

    /// Live segments in table order, stopping at the first zero-length entry
    pub fn segments(&self) -> impl Iterator<Item = SegmentDescriptor> + '_ {
        self.memseg
            .iter()
            .take_while(|seg| !seg.is_empty())
            .enumerate()
            .map(|(index, seg)| SegmentDescriptor::from_wire(index, seg))
    }

    /// Number of live segments
    pub fn segment_count(&self) -> usize {
        self.memseg.iter().take_while(|seg| !seg.is_empty()).count()
    }
}

impl std::fmt::Debug for MemConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let magic = self.magic;
        let memzone_cnt = self.memzone_cnt;
        let mem_cfg_addr = self.mem_cfg_addr;
        f.debug_struct("MemConfig")
            .field("magic", &magic)
            .field("memzone_cnt", &memzone_cnt)
            .field("segments", &self.segment_count())
            .field("mem_cfg_addr", &format_args!("{:#x}", mem_cfg_addr))
            .finish()
    }
}

/// Owned copy of a segment descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentDescriptor {
    /// Position in the segment table
    pub index: usize,
    pub virt_addr: usize,
    pub phys_addr: u64,
    pub len: usize,
    pub page_size: u64,
    pub socket_id: i32,
    pub nchannel: u32,
    pub nrank: u32,
}

impl SegmentDescriptor {
    fn from_wire(index: usize, seg: &MemSeg) -> Self {
        Self {
            index,
            virt_addr: seg.addr as usize,
            phys_addr: seg.phys_addr,
            len: seg.len as usize,
            page_size: seg.hugepage_sz,
            socket_id: seg.socket_id,
            nchannel: seg.nchannel,
            nrank: seg.nrank,
        }
    }

    /// One past the last byte of the segment
    pub fn end(&self) -> usize {
        self.virt_addr + self.len
    }
}
