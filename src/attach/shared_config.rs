//! Attach to the primary's shared config and move it to the primary's address

use std::{
    fs::{File, OpenOptions},
    path::{Path, PathBuf},
    sync::atomic::AtomicU32,
};

use memmap2::{Mmap, MmapOptions};

use crate::{
    error::{AttachError, Result},
    layout::{MemConfig, SegmentDescriptor, MEM_CONFIG_SIZE, RTE_MAGIC},
    mapping::{map_at, Access, PersistentMapping, Sharing},
};

use super::ready::SpinWait;

fn magic_word<'a>(base: *const u8) -> &'a AtomicU32 {
    // SAFETY: `magic` is the first field and every mapping is page aligned,
    // so the word is aligned and lives as long as the mapping.
    unsafe { &*(base as *const AtomicU32) }
}

/// Read-only mapping of the shared config at an OS-chosen address
///
/// Pointers stored inside the structure are not valid at this address; use
/// [`ProvisionalConfig::reattach`] before following any of them.
#[derive(Debug)]
pub struct ProvisionalConfig {
    path: PathBuf,
    file: File,
    mmap: Mmap,
}

impl ProvisionalConfig {
    /// Open the shared config file and map it read-only
    pub fn attach(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let display = path.display().to_string();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| AttachError::config_unavailable(&display, e))?;

        let size = file
            .metadata()
            .map_err(|e| AttachError::config_unavailable(&display, e))?
            .len();
        if size < MEM_CONFIG_SIZE as u64 {
            return Err(AttachError::config_invalid(
                &display,
                format!("file holds {} bytes, layout needs {}", size, MEM_CONFIG_SIZE),
            ));
        }

        // SAFETY: the primary never truncates the file during the session.
        let mmap = unsafe { MmapOptions::new().len(MEM_CONFIG_SIZE).map(&file) }
            .map_err(|e| AttachError::map_failed(format!("cannot map {}", display), e))?;

        log::debug!("provisional config mapping of {} at {:p}", display, mmap.as_ptr());

        Ok(Self {
            path: path.to_path_buf(),
            file,
            mmap,
        })
    }

    /// The mapped structure
    pub fn config(&self) -> &MemConfig {
        // SAFETY: the mapping is MEM_CONFIG_SIZE bytes and MemConfig has alignment 1.
        unsafe { &*(self.mmap.as_ptr() as *const MemConfig) }
    }

    /// Address of the provisional mapping
    pub fn addr(&self) -> usize {
        self.mmap.as_ptr() as usize
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Single non-blocking check of the readiness sentinel
    pub fn is_ready(&self) -> bool {
        magic_word(self.mmap.as_ptr()).load(std::sync::atomic::Ordering::Acquire) == RTE_MAGIC
    }

    /// Spin until the primary has finished populating the structure
    ///
    /// Returns the number of pause hints issued.
    pub fn wait_ready(&self) -> u64 {
        let spins = SpinWait::unbounded()
            .until_eq(magic_word(self.mmap.as_ptr()), RTE_MAGIC)
            .unwrap_or(u64::MAX);
        log::debug!("shared config ready after {} spins", spins);
        spins
    }

    /// Remap the config read-write at the address the primary uses
    ///
    /// The provisional mapping is released first. If the kernel cannot place
    /// the new mapping at that address it is lost for this process.
    pub fn reattach(self) -> Result<SharedConfig> {
        let self_address = self.config().self_address() as usize;
        let Self { path, file, mmap } = self;

        drop(mmap);

        let mapping = map_at(self_address, MEM_CONFIG_SIZE, Access::ReadWrite, Sharing::Shared, &file)
            .map_err(|e| {
                log::error!(
                    "cannot remap {} at {:#x}: {}",
                    path.display(),
                    self_address,
                    e
                );
                e
            })?;

        drop(file);
        log::info!("shared config relocated to {:#x}", mapping.addr());

        Ok(SharedConfig {
            path,
            mapping: mapping.persist(),
        })
    }
}

/// Read-write mapping of the shared config at the primary's address
#[derive(Debug)]
pub struct SharedConfig {
    path: PathBuf,
    mapping: PersistentMapping,
}

impl SharedConfig {
    /// The shared structure
    pub fn config(&self) -> &MemConfig {
        // SAFETY: the persistent mapping covers MEM_CONFIG_SIZE bytes.
        unsafe { &*(self.mapping.addr() as *const MemConfig) }
    }

    /// Raw pointer for bookkeeping writes into the shared structure
    pub fn as_mut_ptr(&self) -> *mut MemConfig {
        self.mapping.addr() as *mut MemConfig
    }

    /// Address of the mapping, equal to the primary's
    pub fn addr(&self) -> usize {
        self.mapping.addr()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_ready(&self) -> bool {
        magic_word(self.mapping.addr() as *const u8).load(std::sync::atomic::Ordering::Acquire)
            == RTE_MAGIC
    }

    /// Live segment descriptors in table order
    pub fn segments(&self) -> Vec<SegmentDescriptor> {
        self.config().segments().collect()
    }

    /// Unmap the shared config
    ///
    /// # Safety
    /// No pointer into the structure may be used afterwards.
    pub unsafe fn detach(self) -> Result<()> {
        self.mapping.unmap()
    }
}
