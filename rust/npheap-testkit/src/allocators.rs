use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};

use npheap::{BackingAllocator, PageAllocator, Storage};
use npheap_page_alloc::{MemoryAllocation, MemoryOwner};

/// Wraps an allocator and counts the buffers it hands out and the buffers
/// that are freed again.
#[derive(Clone)]
pub struct CountingAllocator {
    inner: Arc<dyn BackingAllocator>,
    counters: Arc<Counters>,
}

#[derive(Default)]
struct Counters {
    allocations: AtomicUsize,
    frees: AtomicUsize,
}

impl CountingAllocator {
    pub fn new() -> CountingAllocator {
        CountingAllocator::wrap(Arc::new(PageAllocator::unlimited()))
    }

    pub fn wrap(inner: Arc<dyn BackingAllocator>) -> CountingAllocator {
        CountingAllocator {
            inner,
            counters: Default::default(),
        }
    }

    pub fn allocations(&self) -> usize {
        self.counters.allocations.load(Ordering::SeqCst)
    }

    pub fn frees(&self) -> usize {
        self.counters.frees.load(Ordering::SeqCst)
    }

    /// Buffers allocated and not yet freed.
    pub fn live(&self) -> usize {
        self.allocations() - self.frees()
    }}

impl Default for CountingAllocator {
    fn default() -> Self {
        CountingAllocator::new()
    }
}

impl BackingAllocator for CountingAllocator {
    fn allocate(&self, size: u64) -> std::io::Result<Storage> {
        let inner = self.inner.allocate(size)?;
        self.counters.allocations.fetch_add(1, Ordering::SeqCst);
        Ok(Storage::new(Counted {
            inner,
            counters: self.counters.clone(),
        }))
    }
}

struct Counted {
    inner: Storage,
    counters: Arc<Counters>,
}

unsafe impl MemoryOwner for Counted {
    fn memory(&self) -> MemoryAllocation {
        self.inner.memory()
    }
}

impl Drop for Counted {
    fn drop(&mut self) {
        self.counters.frees.fetch_add(1, Ordering::SeqCst);
    }
}

/// An allocator that fails while `failing` is set and otherwise allocates
/// anonymous pages.
#[derive(Default)]
pub struct FailingAllocator {
    failing: AtomicBool,
}

impl FailingAllocator {
    pub fn new(failing: bool) -> FailingAllocator {
        FailingAllocator {
            failing: AtomicBool::new(failing),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl BackingAllocator for FailingAllocator {
    fn allocate(&self, size: u64) -> std::io::Result<Storage> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(std::io::Error::new(
                std::io::ErrorKind::OutOfMemory,
                "allocator exhausted",
            ));
        }
        PageAllocator::unlimited().allocate(size)
    }
}
