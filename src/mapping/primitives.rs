//! Fixed-address mapping primitives and their scoped guards

use std::{
    ffi::c_void,
    num::NonZeroUsize,
    os::fd::AsFd,
    ptr::NonNull,
};

use nix::sys::mman::{mmap, munmap, MapFlags, ProtFlags};

use crate::error::{AttachError, Result};

/// Access requested for a mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    ReadOnly,
    ReadWrite,
}

impl Access {
    fn prot(self) -> ProtFlags {
        match self {
            Access::ReadOnly => ProtFlags::PROT_READ,
            Access::ReadWrite => ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
        }
    }
}

/// Whether writes are visible to other mappers of the same file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sharing {
    Shared,
    Private,
}

impl Sharing {
    fn flags(self) -> MapFlags {
        match self {
            Sharing::Shared => MapFlags::MAP_SHARED,
            Sharing::Private => MapFlags::MAP_PRIVATE,
        }
    }
}

/// Base page size of the platform
pub fn page_size() -> usize {
    // SAFETY: sysconf has no preconditions.
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size <= 0 {
        4096
    } else {
        size as usize
    }
}

/// Map `len` bytes of `fd` at exactly `addr`
///
/// The address is passed as a hint, never with `MAP_FIXED`, so an occupied
/// range is never clobbered. A mapping that lands elsewhere is unmapped
/// before the mismatch is reported.
pub fn map_at<F: AsFd>(
    addr: usize,
    len: usize,
    access: Access,
    sharing: Sharing,
    fd: F,
) -> Result<MappingGuard> {
    let hint = NonZeroUsize::new(addr)
        .ok_or_else(|| AttachError::address_denied(addr, std::io::Error::from_raw_os_error(libc::EINVAL)))?;
    let length = NonZeroUsize::new(len)
        .ok_or_else(|| AttachError::invalid_layout(format!("zero-length mapping at {:#x}", addr)))?;

    // SAFETY: without MAP_FIXED the kernel never replaces an existing mapping.
    let ptr = unsafe { mmap(Some(hint), length, access.prot(), sharing.flags(), fd, 0) }
        .map_err(|errno| AttachError::address_denied(addr, std::io::Error::from(errno)))?;

    let guard = MappingGuard {
        addr: ptr.as_ptr() as usize,
        len,
    };

    if guard.addr != addr {
        let actual = guard.addr;
        drop(guard);
        return Err(AttachError::address_mismatch(addr, actual));
    }

    Ok(guard)
}

fn unmap_raw(addr: usize, len: usize) -> nix::Result<()> {
    match NonNull::new(addr as *mut c_void) {
        // SAFETY: callers only pass ranges they mapped themselves.
        Some(ptr) => unsafe { munmap(ptr, len) },
        None => Ok(()),
    }
}

/// A mapping that is unmapped when dropped
#[derive(Debug)]
pub struct MappingGuard {
    addr: usize,
    len: usize,
}

impl MappingGuard {
    /// Start address
    pub fn addr(&self) -> usize {
        self.addr
    }

    /// Length in bytes
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Typed pointer to the start of the mapping
    pub fn as_ptr<T>(&self) -> *const T {
        self.addr as *const T
    }

    /// Typed mutable pointer to the start of the mapping
    pub fn as_mut_ptr<T>(&self) -> *mut T {
        self.addr as *mut T
    }

    /// Keep the mapping for the rest of the process
    pub fn persist(self) -> PersistentMapping {
        let mapping = PersistentMapping {
            addr: self.addr,
            len: self.len,
        };
        std::mem::forget(self);
        mapping
    }
}

impl Drop for MappingGuard {
    fn drop(&mut self) {
        if let Err(e) = unmap_raw(self.addr, self.len) {
            log::warn!("munmap({:#x}, {:#x}) failed: {}", self.addr, self.len, e);
        }
    }
}

/// A mapping that outlives its creator and is never unmapped implicitly
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PersistentMapping {
    addr: usize,
    len: usize,
}

impl PersistentMapping {
    pub fn addr(&self) -> usize {
        self.addr
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn end(&self) -> usize {
        self.addr + self.len
    }

    /// Release the mapping
    ///
    /// # Safety
    /// No reference into the range may be used afterwards, and no copy of
    /// this value may be unmapped again.
    pub unsafe fn unmap(self) -> Result<()> {
        unmap_raw(self.addr, self.len).map_err(|errno| {
            AttachError::map_failed(
                format!("munmap({:#x}, {:#x})", self.addr, self.len),
                std::io::Error::from(errno),
            )
        })
    }
}

/// Serialise unit tests that probe for free address ranges
#[cfg(test)]
pub(crate) fn test_address_lock() -> std::sync::MutexGuard<'static, ()> {
    static LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());
    LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
