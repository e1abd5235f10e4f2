#![cfg(unix)]

use libc::{c_void, mmap, mprotect, munmap, MAP_ANONYMOUS, MAP_FAILED, MAP_PRIVATE, PROT_READ, PROT_WRITE};
use std::io;
use std::ptr::{self, NonNull};

/// Granularity of region mappings and protection changes; 4 KiB if unknown.
pub fn page_size() -> usize {
    // SAFETY: sysconf has no memory-safety preconditions.
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    usize::try_from(size).ok().filter(|s| *s > 0).unwrap_or(4096)
}

/// Maps a private, writable region backing one compartment allocation.
/// `None` when the kernel refuses the mapping.
///
/// # Safety
/// The caller owns the mapping and must release it with [`free_region`]
/// using the same `len`.
pub unsafe fn allocate_region(len: usize) -> Option<NonNull<u8>> {
    if len == 0 {
        return None;
    }
    let addr = mmap(ptr::null_mut(), len, PROT_READ | PROT_WRITE, MAP_PRIVATE | MAP_ANONYMOUS, -1, 0);
    if addr == MAP_FAILED {
        None
    } else {
        NonNull::new(addr.cast::<u8>())
    }
}

/// Unmaps a region returned by [`allocate_region`].
///
/// # Safety
/// `base` and `len` must describe a live mapping; it is unusable afterwards.
pub unsafe fn free_region(base: *mut u8, len: usize) {
    if base.is_null() || len == 0 {
        return;
    }
    munmap(base.cast::<c_void>(), len);
}

/// Switches a compartment's region between read-only and read-write.
///
/// # Safety
/// `base` and `len` must describe a live mapping.
///
/// # Errors
/// The OS error reported by `mprotect`.
pub unsafe fn protect_region(base: *mut u8, len: usize, readonly: bool) -> io::Result<()> {
    let prot = if readonly { PROT_READ } else { PROT_READ | PROT_WRITE };
    if mprotect(base.cast::<c_void>(), len, prot) == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}
