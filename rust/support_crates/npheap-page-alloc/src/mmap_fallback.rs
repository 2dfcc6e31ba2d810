use std::alloc::{Layout, alloc_zeroed, dealloc};

/// Allocates zeroed memory aligned to the emulated large page size.
pub fn allocate_large_pages(size: usize) -> std::io::Result<(*mut std::ffi::c_void, usize)> {
    allocate_aligned(size, get_large_page_size())
}

/// Frees memory returned by [`allocate_large_pages`].
///
/// # Safety
///
/// `ptr` and `size` must be the address and capacity returned by
/// [`allocate_large_pages`].
pub unsafe fn free_large_pages(ptr: *mut std::ffi::c_void, size: usize) -> std::io::Result<()> {
    unsafe { free_aligned(ptr, size, get_large_page_size()) }
}

/// Allocates zeroed memory aligned to the emulated page size.
pub fn allocate(size: usize) -> std::io::Result<(*mut std::ffi::c_void, usize)> {
    allocate_aligned(size, get_page_size())
}

/// Frees memory returned by [`allocate`].
///
/// # Safety
///
/// `ptr` and `size` must be the address and capacity returned by [`allocate`].
pub unsafe fn free(ptr: *mut std::ffi::c_void, size: usize) -> std::io::Result<()> {
    unsafe { free_aligned(ptr, size, get_page_size()) }
}

fn allocate_aligned(
    size: usize,
    page_size: usize,
) -> std::io::Result<(*mut std::ffi::c_void, usize)> {
    assert!(page_size.is_power_of_two());
    let capacity = size
        .max(1)
        .checked_next_multiple_of(page_size)
        .ok_or_else(|| std::io::Error::from(std::io::ErrorKind::OutOfMemory))?;
    let layout = Layout::from_size_align(capacity, page_size)
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidInput, "Invalid layout"))?;

    let ptr = unsafe { alloc_zeroed(layout) };
    if ptr.is_null() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::OutOfMemory,
            "Failed to allocate memory",
        ));
    }
    Ok((ptr as *mut std::ffi::c_void, capacity))
}

unsafe fn free_aligned(
    ptr: *mut std::ffi::c_void,
    size: usize,
    page_size: usize,
) -> std::io::Result<()> {
    assert!(size.is_multiple_of(page_size));
    let layout = Layout::from_size_align(size, page_size)
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidInput, "Invalid layout"))?;
    unsafe { dealloc(ptr as *mut u8, layout) };
    Ok(())
}

pub fn get_large_page_size() -> usize {
    2 * 1024 * 1024
}

pub fn get_page_size() -> usize {
    4 * 1024
}
