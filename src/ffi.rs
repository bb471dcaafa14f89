//! C API for hosts that bootstrap from C
//!
//! The reconstructed memory and the physical address resolver are held in
//! process-wide slots; these are the only globals in the crate. The resolver
//! is probed once on first use, so once the page-table export is known to be
//! unusable no entry point touches it again.

use std::{
    ffi::{c_char, c_int, c_void, CStr, CString},
    ptr::null_mut,
    sync::{Arc, Mutex, MutexGuard},
};

use crate::{
    bootstrap::{AttachedMemory, Bootstrap},
    config::AttachConfig,
    error::{AttachError, Result},
    layout::BAD_PHYS_ADDR,
    physaddr::PhysAddrResolver,
};

lazy_static::lazy_static! {
    static ref ATTACHED: Mutex<Option<AttachedMemory>> = Mutex::new(None);
    static ref RESOLVER: Arc<PhysAddrResolver> = {
        let resolver = PhysAddrResolver::default();
        resolver.probe();
        Arc::new(resolver)
    };
}

/// Error codes for the C API, returned negated
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HugeattachErrorCode {
    Success = 0,
    ConfigUnavailable = 1,
    MapFailed = 2,
    AddressMismatch = 3,
    HugepageMissing = 4,
    PhysicalAddressUnavailable = 5,
    InvalidLayout = 6,
    InvalidParameter = 7,
    AlreadyAttached = 8,
}

impl From<&AttachError> for HugeattachErrorCode {
    fn from(error: &AttachError) -> Self {
        match error {
            AttachError::ConfigUnavailable { .. } => HugeattachErrorCode::ConfigUnavailable,
            AttachError::MapFailed { .. } => HugeattachErrorCode::MapFailed,
            AttachError::AddressMismatch { .. } => HugeattachErrorCode::AddressMismatch,
            AttachError::HugepageMissing { .. } => HugeattachErrorCode::HugepageMissing,
            AttachError::PhysicalAddressUnavailable { .. } => {
                HugeattachErrorCode::PhysicalAddressUnavailable
            }
            AttachError::InvalidLayout { .. } => HugeattachErrorCode::InvalidLayout,
            AttachError::InvalidParameter { .. } => HugeattachErrorCode::InvalidParameter,
        }
    }
}

fn slot() -> MutexGuard<'static, Option<AttachedMemory>> {
    ATTACHED.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

unsafe fn c_str_to_string(ptr: *const c_char, parameter: &str) -> Result<String> {
    if ptr.is_null() {
        return Err(AttachError::invalid_parameter(parameter, "Null pointer"));
    }

    CStr::from_ptr(ptr)
        .to_str()
        .map(|s| s.to_string())
        .map_err(|_| AttachError::invalid_parameter(parameter, "Invalid UTF-8"))
}

fn run_attach(config: AttachConfig) -> c_int {
    let _ = env_logger::try_init();

    let mut slot = slot();
    if slot.is_some() {
        return -(HugeattachErrorCode::AlreadyAttached as c_int);
    }

    match Bootstrap::with_resolver(config, Arc::clone(&RESOLVER)).run() {
        Ok(memory) => {
            *slot = Some(memory);
            HugeattachErrorCode::Success as c_int
        }
        Err(e) => -(HugeattachErrorCode::from(&e) as c_int),
    }
}

/// Reconstruct the primary's layout using the well-known paths
///
/// Returns 0 on success or a negated [`HugeattachErrorCode`].
#[no_mangle]
pub extern "C" fn hugeattach_mapping() -> c_int {
    run_attach(AttachConfig::default())
}

/// Reconstruct the primary's layout from explicit file paths
///
/// # Safety
/// Both arguments must be valid NUL-terminated strings.
#[no_mangle]
pub unsafe extern "C" fn hugeattach_mapping_with_paths(
    config_path: *const c_char,
    hugepage_path: *const c_char,
) -> c_int {
    let paths = c_str_to_string(config_path, "config_path")
        .and_then(|c| c_str_to_string(hugepage_path, "hugepage_path").map(|h| (c, h)));

    match paths {
        Ok((config_path, hugepage_path)) => run_attach(
            AttachConfig::new()
                .with_config_path(config_path)
                .with_hugepage_path(hugepage_path),
        ),
        Err(e) => -(HugeattachErrorCode::from(&e) as c_int),
    }
}

/// Physical address of `addr`, or `u64::MAX` when unknown
#[no_mangle]
pub extern "C" fn hugeattach_virt2phy(addr: *const c_void) -> u64 {
    RESOLVER.virt_to_phys(addr as usize).unwrap_or(BAD_PHYS_ADDR)
}

/// Number of reconstructed segments, 0 before a successful attach
#[no_mangle]
pub extern "C" fn hugeattach_segment_count() -> u32 {
    slot().as_ref().map_or(0, |memory| memory.segments().len() as u32)
}

/// Address of the shared config, null before a successful attach
#[no_mangle]
pub extern "C" fn hugeattach_mem_config() -> *mut c_void {
    slot()
        .as_ref()
        .map_or(null_mut(), |memory| memory.shared().as_mut_ptr() as *mut c_void)
}

/// Version string (caller must free with hugeattach_free_string)
#[no_mangle]
pub extern "C" fn hugeattach_version_string() -> *mut c_char {
    match CString::new(crate::VERSION) {
        Ok(c_string) => c_string.into_raw(),
        Err(_) => null_mut(),
    }
}

/// Free a string returned by this library
///
/// # Safety
/// `ptr` must come from this library and not be freed twice.
#[no_mangle]
pub unsafe extern "C" fn hugeattach_free_string(ptr: *mut c_char) {
    if !ptr.is_null() {
        let _ = CString::from_raw(ptr);
    }
}
