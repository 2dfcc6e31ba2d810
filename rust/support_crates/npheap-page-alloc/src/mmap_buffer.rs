//! Owned, page-aligned, zero-filled buffers.
//!
//! `MmapBuffer` is the unit of backing storage handed out to heap objects.
//! Its contents are zero on allocation and it is unmapped when dropped.
//!
//! # Safety
//!
//! `MmapBuffer` is `Send` and `Sync`. Cooperating users that write through
//! [`MmapBuffer::ptr`] from several threads coordinate that access themselves.

use std::sync::OnceLock;

use crate::memory_owner::{MemoryAllocation, MemoryOwner};
use crate::mmap;

pub struct MmapBuffer {
    ptr: *mut u8,
    /// Requested size in bytes.
    len: usize,
    /// Mapped size, a multiple of `alignment`.
    capacity: usize,
    uses_large_pages: bool,
    /// Page size used for the allocation.
    alignment: usize,
}

impl MmapBuffer {
    pub fn regular_page_size() -> usize {
        mmap::get_page_size()
    }

    pub fn large_page_size() -> usize {
        mmap::get_large_page_size()
    }

    /// Allocates `size` zero-filled bytes, trying large pages first when
    /// `prefer_large_pages` is set and falling back to regular pages.
    pub fn allocate_zeroed(size: usize, prefer_large_pages: bool) -> std::io::Result<MmapBuffer> {
        if prefer_large_pages {
            if let Ok(buf) = Self::allocate_large_pages(size) {
                return Ok(buf);
            }
        }
        Self::allocate_regular(size)
    }

    /// Allocates `size` bytes backed by large pages.
    ///
    /// # Errors
    ///
    /// Fails when large pages are not configured on the host or the host
    /// lacks enough free large pages.
    pub fn allocate_large_pages(size: usize) -> std::io::Result<MmapBuffer> {
        check_large_page_support()?;

        let (ptr, capacity) = mmap::allocate_large_pages(size)?;
        debug_assert!((ptr as usize).is_multiple_of(Self::large_page_size()));
        Ok(MmapBuffer {
            ptr: ptr as _,
            len: size,
            capacity,
            uses_large_pages: true,
            alignment: mmap::get_large_page_size(),
        })
    }

    /// Allocates `size` bytes backed by regular pages.
    pub fn allocate_regular(size: usize) -> std::io::Result<MmapBuffer> {
        let (ptr, capacity) = mmap::allocate(size)?;
        debug_assert!((ptr as usize).is_multiple_of(Self::regular_page_size()));
        Ok(MmapBuffer {
            ptr: ptr as _,
            len: size,
            capacity,
            uses_large_pages: false,
            alignment: mmap::get_page_size(),
        })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Raw pointer to the first byte.
    ///
    /// The pointer is valid for `capacity()` bytes until the buffer is dropped.
    #[inline]
    pub fn ptr(&self) -> *mut u8 {
        self.ptr
    }

    #[inline]
    pub fn uses_large_pages(&self) -> bool {
        self.uses_large_pages
    }

    #[inline]
    pub fn alignment(&self) -> usize {
        self.alignment
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr, self.len) }
    }
}

unsafe impl MemoryOwner for MmapBuffer {
    fn memory(&self) -> MemoryAllocation {
        MemoryAllocation {
            ptr: self.ptr,
            len: self.len,
            capacity: self.capacity,
            alignment: self.alignment,
        }
    }
}

impl Drop for MmapBuffer {
    fn drop(&mut self) {
        if self.ptr.is_null() {
            return;
        }
        // An unmap failure leaves the pages mapped; there is nobody to report it to.
        if self.uses_large_pages {
            let _ = unsafe { mmap::free_large_pages(self.ptr as _, self.capacity) };
        } else {
            let _ = unsafe { mmap::free(self.ptr as _, self.capacity) };
        }
    }
}

// SAFETY: the buffer exclusively owns its mapping and releases it on drop.
unsafe impl Send for MmapBuffer {}

// SAFETY: shared access only hands out the pointer; writers synchronize among themselves.
unsafe impl Sync for MmapBuffer {}

impl std::fmt::Debug for MmapBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MmapBuffer")
            .field("ptr", &self.ptr)
            .field("len", &self.len)
            .field("capacity", &self.capacity)
            .field("uses_large_pages", &self.uses_large_pages)
            .finish()
    }
}

/// Probes once whether the host can hand out large pages.
pub fn check_large_page_support() -> std::io::Result<()> {
    static RESULT: OnceLock<std::io::Result<()>> = OnceLock::new();
    match RESULT.get_or_init(try_large_page_allocation) {
        Ok(()) => Ok(()),
        Err(e) => Err(std::io::Error::new(e.kind(), e.to_string())),
    }
}

fn try_large_page_allocation() -> std::io::Result<()> {
    let (ptr, size) = mmap::allocate_large_pages(1)?;
    let _ = unsafe { mmap::free_large_pages(ptr, size) };
    Ok(())
}
