//! Test doubles for the heap's external collaborators.

pub mod allocators;
pub mod spaces;

pub use allocators::{CountingAllocator, FailingAllocator};
pub use spaces::RejectingAddressSpace;

/// Host page size as a `u64`.
pub fn page_size() -> u64 {
    npheap_page_alloc::page_size() as u64
}
