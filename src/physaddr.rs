//! Virtual to physical address translation through the kernel page-table export
//!
//! Each virtual page has one 8-byte entry in `/proc/self/pagemap`; bits 0-54
//! hold the page frame number. Unprivileged readers see a zero frame number,
//! which is reported the same way as an unmapped page.

use std::{
    fs::File,
    io::{Read, Seek, SeekFrom},
    path::{Path, PathBuf},
    sync::atomic::{AtomicBool, AtomicU64, Ordering},
};

use crate::{
    config::DEFAULT_PAGEMAP_PATH,
    error::{AttachError, Result},
    layout::{PAGEMAP_ENTRY_SIZE, PFN_MASK},
    mapping::page_size,
};

/// Counters of resolver activity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PhysAddrStats {
    /// Calls to `virt_to_phys`
    pub lookups: u64,
    /// Lookups that reached the kernel interface
    pub kernel_reads: u64,
    /// Lookups that failed for any reason
    pub failures: u64,
}

/// Resolves physical addresses of the current process
#[derive(Debug)]
pub struct PhysAddrResolver {
    pagemap_path: PathBuf,
    page_size: usize,
    available: AtomicBool,
    lookups: AtomicU64,
    kernel_reads: AtomicU64,
    failures: AtomicU64,
}

impl Default for PhysAddrResolver {
    fn default() -> Self {
        Self::new(DEFAULT_PAGEMAP_PATH)
    }
}

impl PhysAddrResolver {
    /// Create a resolver reading the export at `pagemap_path`
    pub fn new(pagemap_path: impl Into<PathBuf>) -> Self {
        Self {
            pagemap_path: pagemap_path.into(),
            page_size: page_size(),
            available: AtomicBool::new(true),
            lookups: AtomicU64::new(0),
            kernel_reads: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    pub fn pagemap_path(&self) -> &Path {
        &self.pagemap_path
    }

    /// Whether the kernel interface is still considered usable
    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::Relaxed)
    }

    /// Translate the address of a stack variable once
    ///
    /// On failure the resolver is marked unavailable for the rest of its life
    /// and every later lookup fails without touching the kernel.
    pub fn probe(&self) -> bool {
        let local = 0u64;
        let addr = std::hint::black_box(&local) as *const u64 as usize;
        match self.virt_to_phys(addr) {
            Ok(_) => true,
            Err(e) => {
                log::warn!("cannot obtain physical addresses: {}", e);
                self.available.store(false, Ordering::Relaxed);
                false
            }
        }
    }

    /// Physical address backing `addr`
    pub fn virt_to_phys(&self, addr: usize) -> Result<u64> {
        self.lookups.fetch_add(1, Ordering::Relaxed);

        if !self.is_available() {
            self.failures.fetch_add(1, Ordering::Relaxed);
            return Err(AttachError::phys_unavailable(addr, "page-table export disabled"));
        }

        self.kernel_reads.fetch_add(1, Ordering::Relaxed);
        self.read_entry(addr).map_err(|e| {
            self.failures.fetch_add(1, Ordering::Relaxed);
            e
        })
    }

    fn read_entry(&self, addr: usize) -> Result<u64> {
        let path = self.pagemap_path.display();

        let mut file = File::open(&self.pagemap_path).map_err(|e| {
            AttachError::phys_unavailable(addr, format!("cannot open {}: {}", path, e))
        })?;

        let virt_pfn = (addr / self.page_size) as u64;
        file.seek(SeekFrom::Start(virt_pfn * PAGEMAP_ENTRY_SIZE as u64))
            .map_err(|e| AttachError::phys_unavailable(addr, format!("seek error in {}: {}", path, e)))?;

        let mut entry = [0u8; PAGEMAP_ENTRY_SIZE];
        let read = file.read(&mut entry).map_err(|e| {
            AttachError::phys_unavailable(addr, format!("cannot read {}: {}", path, e))
        })?;
        if read != PAGEMAP_ENTRY_SIZE {
            return Err(AttachError::phys_unavailable(
                addr,
                format!("read {} bytes from {} but expected {}", read, path, PAGEMAP_ENTRY_SIZE),
            ));
        }

        translate(u64::from_le_bytes(entry), addr, self.page_size)
            .ok_or_else(|| AttachError::phys_unavailable(addr, "page not present"))
    }

    pub fn stats(&self) -> PhysAddrStats {
        PhysAddrStats {
            lookups: self.lookups.load(Ordering::Relaxed),
            kernel_reads: self.kernel_reads.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}

/// Physical address from a raw page-table entry, `None` for a zero frame
fn translate(entry: u64, addr: usize, page_size: usize) -> Option<u64> {
    let pfn = entry & PFN_MASK;
    if pfn == 0 {
        return None;
    }
    Some(pfn * page_size as u64 + (addr % page_size) as u64)
}
