//! Backing storage of memory objects and the allocator that produces it.

use std::sync::Arc;

use npheap_budget_tracker::{Allocation, Budget};
use npheap_page_alloc::{MemoryAllocation, MemoryOwner, MmapBuffer};

/// Shared handle to a zero-initialized backing buffer.
///
/// The memory object owning the storage holds one handle; every live
/// exposure of it holds another. The buffer is freed when the last handle
/// is dropped, so deleting an object never pulls memory out from under an
/// address range that still exposes it.
#[derive(Clone)]
pub struct Storage(Arc<dyn MemoryOwner>);

impl Storage {
    pub fn new(owner: impl MemoryOwner + 'static) -> Storage {
        Storage(Arc::new(owner))
    }

    pub fn memory(&self) -> MemoryAllocation {
        self.0.memory()
    }

    /// Requested length in bytes.
    pub fn len(&self) -> u64 {
        self.memory().len as u64
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Length actually backed, a whole number of pages.
    pub fn capacity(&self) -> u64 {
        self.memory().capacity as u64
    }

    pub fn address(&self) -> u64 {
        self.memory().address()
    }

    /// Number of live handles (owner plus exposures).
    pub fn holders(&self) -> usize {
        Arc::strong_count(&self.0)
    }

    pub fn same_buffer(&self, other: &Storage) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Copies `src` into the buffer at `offset`.
    ///
    /// # Safety
    ///
    /// No other caller may access `[offset, offset + src.len())` concurrently.
    /// Cooperating callers guarantee this by holding the owning object's
    /// advisory lock.
    ///
    /// # Panics
    ///
    /// Panics if the range exceeds the buffer capacity.
    pub unsafe fn write_at(&self, offset: u64, src: &[u8]) {
        let memory = self.memory();
        let offset = checked_offset(offset, src.len(), memory.capacity);
        unsafe {
            std::ptr::copy_nonoverlapping(
                src.as_ptr(),
                (memory.ptr as *mut u8).add(offset),
                src.len(),
            );
        }
    }

    /// Copies `dst.len()` bytes at `offset` out of the buffer.
    ///
    /// # Safety
    ///
    /// No other caller may write `[offset, offset + dst.len())` concurrently.
    ///
    /// # Panics
    ///
    /// Panics if the range exceeds the buffer capacity.
    pub unsafe fn read_at(&self, offset: u64, dst: &mut [u8]) {
        let memory = self.memory();
        let offset = checked_offset(offset, dst.len(), memory.capacity);
        unsafe {
            std::ptr::copy_nonoverlapping(memory.ptr.add(offset), dst.as_mut_ptr(), dst.len());
        }
    }
}

/// Converts `offset` to `usize`, panicking unless `[offset, offset + len)`
/// lies within `capacity`.
fn checked_offset(offset: u64, len: usize, capacity: usize) -> usize {
    let start = usize::try_from(offset).ok();
    match start.and_then(|start| start.checked_add(len)) {
        Some(end) if end <= capacity => end - len,
        _ => panic!("range at offset {offset} of {len} bytes exceeds capacity {capacity}"),
    }
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let memory = self.memory();
        f.debug_struct("Storage")
            .field("ptr", &memory.ptr)
            .field("len", &memory.len)
            .field("capacity", &memory.capacity)
            .finish()
    }
}

/// Source of zero-initialized backing storage.
///
/// Storage is returned to the allocator by dropping its last handle.
pub trait BackingAllocator: Send + Sync + 'static {
    fn allocate(&self, size: u64) -> std::io::Result<Storage>;
}

/// The default allocator: page-aligned anonymous mappings, optionally
/// charged against a [`Budget`].
pub struct PageAllocator {
    budget: Option<Budget>,
    large_pages: bool,
}

impl PageAllocator {
    pub fn new(budget: Option<Budget>, large_pages: bool) -> PageAllocator {
        PageAllocator {
            budget,
            large_pages,
        }
    }

    pub fn unlimited() -> PageAllocator {
        PageAllocator::new(None, false)
    }
}

impl BackingAllocator for PageAllocator {
    fn allocate(&self, size: u64) -> std::io::Result<Storage> {
        let len = usize::try_from(size)
            .map_err(|_| std::io::Error::from(std::io::ErrorKind::OutOfMemory))?;
        // Charged in whole regular pages, the granularity the host maps at.
        let charge = size
            .max(1)
            .checked_next_multiple_of(MmapBuffer::regular_page_size() as u64)
            .ok_or_else(|| std::io::Error::from(std::io::ErrorKind::OutOfMemory))?;
        let allocation = self
            .budget
            .as_ref()
            .map(|budget| budget.allocate(charge))
            .transpose()?;
        let buffer = MmapBuffer::allocate_zeroed(len, self.large_pages)?;
        Ok(Storage::new(BudgetedBuffer {
            buffer,
            _allocation: allocation,
        }))
    }
}

/// A mapped buffer together with the budget it was charged to.
///
/// Field order matters: the buffer is unmapped before the budget is credited.
struct BudgetedBuffer {
    buffer: MmapBuffer,
    _allocation: Option<Allocation>,
}

unsafe impl MemoryOwner for BudgetedBuffer {
    fn memory(&self) -> MemoryAllocation {
        self.buffer.memory()
    }
}
