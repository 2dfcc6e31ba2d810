//! Page-granular, zero-filled backing storage for heap objects.
//!
//! - [`mmap_buffer`]: `MmapBuffer`, an owned page-aligned buffer
//! - [`memory_owner`]: the `MemoryOwner` trait describing an owned memory block
//! - `mmap`: platform primitives (anonymous shared mappings on Linux,
//!   the global allocator elsewhere)

pub mod memory_owner;
pub mod mmap_buffer;

#[cfg_attr(target_os = "linux", path = "mmap_linux.rs")]
#[cfg_attr(not(target_os = "linux"), path = "mmap_fallback.rs")]
pub mod mmap;

pub use memory_owner::{MemoryAllocation, MemoryOwner};
pub use mmap_buffer::MmapBuffer;

/// Returns the host page size in bytes.
pub fn page_size() -> usize {
    mmap::get_page_size()
}
