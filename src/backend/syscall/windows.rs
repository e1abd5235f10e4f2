#![cfg(windows)]

use std::io;
use std::ptr::{self, NonNull};
use windows_sys::Win32::System::Memory::{
    VirtualAlloc, VirtualFree, VirtualProtect, MEM_COMMIT, MEM_RELEASE, MEM_RESERVE, PAGE_READONLY, PAGE_READWRITE,
};
use windows_sys::Win32::System::SystemInformation::{GetSystemInfo, SYSTEM_INFO};

/// Granularity of region mappings and protection changes; 4 KiB if unknown.
pub fn page_size() -> usize {
    // SAFETY: GetSystemInfo only writes into the provided struct.
    let info = unsafe {
        let mut info: SYSTEM_INFO = core::mem::zeroed();
        GetSystemInfo(&mut info);
        info
    };
    match info.dwPageSize {
        0 => 4096,
        n => n as usize,
    }
}

/// Reserves and commits a writable region backing one compartment
/// allocation. `None` when the system refuses it.
///
/// # Safety
/// The caller owns the region and must release it with [`free_region`].
pub unsafe fn allocate_region(len: usize) -> Option<NonNull<u8>> {
    if len == 0 {
        return None;
    }
    NonNull::new(VirtualAlloc(ptr::null(), len, MEM_COMMIT | MEM_RESERVE, PAGE_READWRITE).cast::<u8>())
}

/// Releases a region returned by [`allocate_region`]. The whole reservation
/// goes at once, so `len` is not needed.
///
/// # Safety
/// `base` must be the start of a live region; it is unusable afterwards.
pub unsafe fn free_region(base: *mut u8, _len: usize) {
    if base.is_null() {
        return;
    }
    VirtualFree(base.cast(), 0, MEM_RELEASE);
}

/// Switches a compartment's region between read-only and read-write.
///
/// # Safety
/// `base` and `len` must lie inside a live region.
///
/// # Errors
/// The OS error reported by `VirtualProtect`.
pub unsafe fn protect_region(base: *mut u8, len: usize, readonly: bool) -> io::Result<()> {
    let prot = if readonly { PAGE_READONLY } else { PAGE_READWRITE };
    let mut previous = 0;
    if VirtualProtect(base.cast_const().cast(), len, prot, &mut previous) != 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}
