//! Raw virtual-memory regions used by the region backend.

#[cfg(unix)]
pub mod unix;

#[cfg(windows)]
pub mod windows;

#[cfg(unix)]
pub use unix::*;

#[cfg(windows)]
pub use windows::*;

/// Rounds `value` up to a multiple of `align` (a power of two).
pub const fn align_up(value: usize, align: usize) -> usize {
    if align == 0 {
        value
    } else {
        (value + (align - 1)) & !(align - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align_up_rounds_to_page() {
        assert_eq!(align_up(1, 4096), 4096);
        assert_eq!(align_up(4096, 4096), 4096);
        assert_eq!(align_up(4097, 4096), 8192);
        assert_eq!(align_up(5, 0), 5);
    }

    #[test]
    fn region_is_writable_and_protectable() {
        let size = page_size();
        unsafe {
            let ptr = allocate_region(size).expect("mapping one page").as_ptr();
            ptr.write(0xAB);
            protect_region(ptr, size, true).unwrap();
            assert_eq!(ptr.read(), 0xAB);
            protect_region(ptr, size, false).unwrap();
            ptr.write(0xCD);
            assert_eq!(ptr.read(), 0xCD);
            free_region(ptr, size);
        }
    }
}
