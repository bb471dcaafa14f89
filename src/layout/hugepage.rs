//! Hugepage table records and a read-only view over the table file

use std::{
    ffi::OsStr,
    mem::{offset_of, size_of},
    os::unix::ffi::OsStrExt,
    path::{Path, PathBuf},
};

use crate::error::{AttachError, Result};

use super::constants::MAX_HUGEPAGE_PATH;

/// One backing file of a hugepage, as written by the primary
#[repr(C)]
#[derive(Clone)]
pub struct HugepageRecord {
    /// Address of the first mapping in the primary
    pub orig_va: u64,
    /// Address of the final mapping in the primary
    pub final_va: u64,
    pub physaddr: u64,
    /// Page size in bytes
    pub size: u64,
    pub socket_id: i32,
    /// Index in the hugetlbfs file name pattern
    pub file_id: i32,
    /// Segment the page belongs to
    pub memseg_id: i32,
    /// NUL-terminated path of the backing file
    pub filepath: [u8; MAX_HUGEPAGE_PATH],
    _pad: [u8; 4],
}

/// Size of one record in the table file
pub const HUGEPAGE_RECORD_SIZE: usize = size_of::<HugepageRecord>();

const _: () = {
    assert!(offset_of!(HugepageRecord, size) == 24);
    assert!(offset_of!(HugepageRecord, memseg_id) == 40);
    assert!(offset_of!(HugepageRecord, filepath) == 44);
    assert!(HUGEPAGE_RECORD_SIZE == 4144);
};

const MEMSEG_ID_OFFSET: usize = offset_of!(HugepageRecord, memseg_id);

impl HugepageRecord {
    /// Build a record for a backing file at `path`
    pub fn new(path: impl AsRef<Path>, final_va: u64, size: u64, memseg_id: i32) -> Result<Self> {
        let raw = path.as_ref().as_os_str().as_bytes();
        if raw.is_empty() || raw.len() >= MAX_HUGEPAGE_PATH || raw.contains(&0) {
            return Err(AttachError::invalid_parameter(
                "filepath",
                format!("path must be 1..{} bytes without NUL", MAX_HUGEPAGE_PATH),
            ));
        }

        let mut filepath = [0u8; MAX_HUGEPAGE_PATH];
        filepath[..raw.len()].copy_from_slice(raw);

        Ok(Self {
            orig_va: final_va,
            final_va,
            physaddr: 0,
            size,
            socket_id: 0,
            file_id: 0,
            memseg_id,
            filepath,
            _pad: [0; 4],
        })
    }

    /// Set the physical address
    pub fn with_physaddr(mut self, physaddr: u64) -> Self {
        self.physaddr = physaddr;
        self
    }

    /// Set the NUMA socket and file ids
    pub fn with_ids(mut self, socket_id: i32, file_id: i32) -> Self {
        self.socket_id = socket_id;
        self.file_id = file_id;
        self
    }

    /// Path of the backing file, up to the first NUL
    pub fn path(&self) -> &Path {
        let end = self
            .filepath
            .iter()
            .position(|b| *b == 0)
            .unwrap_or(MAX_HUGEPAGE_PATH);
        Path::new(OsStr::from_bytes(&self.filepath[..end]))
    }

    /// Raw bytes in the frozen wire format
    pub fn as_bytes(&self) -> &[u8] {
        // SAFETY: repr(C) with explicit tail padding, no implicit padding.
        unsafe { std::slice::from_raw_parts(self as *const Self as *const u8, HUGEPAGE_RECORD_SIZE) }
    }
}

impl std::fmt::Debug for HugepageRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HugepageRecord")
            .field("final_va", &format_args!("{:#x}", self.final_va))
            .field("physaddr", &format_args!("{:#x}", self.physaddr))
            .field("size", &self.size)
            .field("socket_id", &self.socket_id)
            .field("file_id", &self.file_id)
            .field("memseg_id", &self.memseg_id)
            .field("path", &self.path())
            .finish()
    }
}

/// Owned summary of a record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HugepageEntry {
    pub orig_va: u64,
    pub final_va: u64,
    pub physaddr: u64,
    pub size: u64,
    pub socket_id: i32,
    pub file_id: i32,
    pub memseg_id: i32,
    pub path: PathBuf,
}

impl From<&HugepageRecord> for HugepageEntry {
    fn from(record: &HugepageRecord) -> Self {
        Self {
            orig_va: record.orig_va,
            final_va: record.final_va,
            physaddr: record.physaddr,
            size: record.size,
            socket_id: record.socket_id,
            file_id: record.file_id,
            memseg_id: record.memseg_id,
            path: record.path().to_path_buf(),
        }
    }
}

/// Read-only view over the raw bytes of a hugepage table file
///
/// Trailing bytes that do not form a whole record are ignored.
#[derive(Clone, Copy)]
pub struct HugepageTable<'a> {
    bytes: &'a [u8],
}

impl<'a> HugepageTable<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    /// Number of whole records
    pub fn len(&self) -> usize {
        self.bytes.len() / HUGEPAGE_RECORD_SIZE
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Segment id of record `index`, read without copying the whole record
    pub fn segment_id(&self, index: usize) -> Option<i32> {
        if index >= self.len() {
            return None;
        }
        let start = index * HUGEPAGE_RECORD_SIZE + MEMSEG_ID_OFFSET;
        let raw: [u8; 4] = self.bytes[start..start + 4].try_into().ok()?;
        Some(i32::from_ne_bytes(raw))
    }

    /// Copy of record `index`
    pub fn record(&self, index: usize) -> Option<HugepageRecord> {
        if index >= self.len() {
            return None;
        }
        let start = index * HUGEPAGE_RECORD_SIZE;
        let ptr = self.bytes[start..start + HUGEPAGE_RECORD_SIZE].as_ptr() as *const HugepageRecord;
        // SAFETY: bounds checked above, every bit pattern is a valid record.
        Some(unsafe { std::ptr::read_unaligned(ptr) })
    }

    /// Indices of records belonging to `segment`, in table order
    pub fn indices_for(&self, segment: usize) -> impl Iterator<Item = usize> + 'a {
        let table = *self;
        (0..table.len()).filter(move |i| {
            table
                .segment_id(*i)
                .map_or(false, |id| id >= 0 && id as usize == segment)
        })
    }

    /// All records as owned entries
    pub fn entries(&self) -> impl Iterator<Item = HugepageEntry> + 'a {
        let table = *self;
        (0..table.len()).filter_map(move |i| table.record(i).map(|r| HugepageEntry::from(&r)))
    }
}
