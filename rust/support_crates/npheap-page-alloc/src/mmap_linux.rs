use std::sync::OnceLock;

/// Maps `size` bytes (rounded up to whole large pages) of zero-filled memory
/// backed by huge pages.
///
/// Returns the mapping address and its capacity. Fails unless huge pages are
/// configured on the host, e.g. through `/proc/sys/vm/nr_hugepages` or
/// `/proc/sys/vm/nr_overcommit_hugepages`.
///
/// The mapping must be released with [`free_large_pages`] and the returned
/// capacity.
pub fn allocate_large_pages(size: usize) -> std::io::Result<(*mut std::ffi::c_void, usize)> {
    map_shared_anonymous(size, get_large_page_size(), libc::MAP_HUGETLB)
}

/// Releases a mapping made by [`allocate_large_pages`].
///
/// # Safety
///
/// `ptr` and `size` must be exactly the address and capacity returned by
/// [`allocate_large_pages`], and the mapping must not be accessed afterwards.
pub unsafe fn free_large_pages(ptr: *mut std::ffi::c_void, size: usize) -> std::io::Result<()> {
    unsafe { free(ptr, size) }
}

/// Maps `size` bytes (rounded up to whole pages) of zero-filled memory.
///
/// The mapping is `MAP_SHARED`, so it stays shared with any process forked
/// after the allocation instead of being copied on write.
///
/// The mapping must be released with [`free`] and the returned capacity.
pub fn allocate(size: usize) -> std::io::Result<(*mut std::ffi::c_void, usize)> {
    map_shared_anonymous(size, get_page_size(), 0)
}

/// Releases a mapping made by [`allocate`].
///
/// # Safety
///
/// `ptr` and `size` must be exactly the address and capacity returned by
/// [`allocate`], and the mapping must not be accessed afterwards.
pub unsafe fn free(ptr: *mut std::ffi::c_void, size: usize) -> std::io::Result<()> {
    let res = unsafe { libc::munmap(ptr, size) };
    if res < 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

fn map_shared_anonymous(
    size: usize,
    page_size: usize,
    extra_flags: libc::c_int,
) -> std::io::Result<(*mut std::ffi::c_void, usize)> {
    assert!(page_size.is_power_of_two());
    let capacity = size
        .max(1)
        .checked_next_multiple_of(page_size)
        .ok_or_else(|| std::io::Error::from(std::io::ErrorKind::OutOfMemory))?;
    let ptr = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            capacity,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_SHARED | libc::MAP_ANONYMOUS | extra_flags,
            -1,
            0,
        )
    };
    if ptr.is_null() || ptr == libc::MAP_FAILED {
        return Err(std::io::Error::last_os_error());
    }
    Ok((ptr, capacity))
}

/// Huge page size from `Hugepagesize:` in `/proc/meminfo`, or 2MB if it
/// cannot be read.
pub fn get_large_page_size() -> usize {
    static SIZE: OnceLock<usize> = OnceLock::new();
    *SIZE.get_or_init(|| read_large_page_size().unwrap_or(2 * 1024 * 1024))
}

/// Page size from `sysconf(_SC_PAGESIZE)`, or 4KB if it cannot be read.
pub fn get_page_size() -> usize {
    static SIZE: OnceLock<usize> = OnceLock::new();
    *SIZE.get_or_init(|| read_page_size().unwrap_or(4 * 1024))
}

fn read_large_page_size() -> std::io::Result<usize> {
    let meminfo = std::fs::read_to_string("/proc/meminfo")?;
    meminfo
        .lines()
        .find_map(|line| line.strip_prefix("Hugepagesize:"))
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|kb| kb.parse::<usize>().ok())
        .map(|kb| kb * 1024)
        .ok_or_else(|| std::io::Error::other("Failed to read Hugepagesize"))
}

fn read_page_size() -> std::io::Result<usize> {
    let res = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if res <= 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(res as usize)
}
