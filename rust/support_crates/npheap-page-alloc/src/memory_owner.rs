//! `MemoryOwner`: a trait for types that exclusively own a block of backing memory.

/// A trait for types that own a page-aligned memory block.
///
/// # Safety
///
/// Implementors must guarantee that:
/// - The block described by `memory()` stays valid, at the same address,
///   for the entire lifetime of the owner.
/// - The block is exclusively owned by this instance and released only when
///   the owner is dropped.
/// - `ptr` is aligned to `alignment`, and `len <= capacity`.
pub unsafe trait MemoryOwner: Send + Sync {
    /// Returns the location and extent of the owned block.
    fn memory(&self) -> MemoryAllocation;
}

/// Location and extent of an owned memory block.
#[derive(Debug, Clone, Copy)]
pub struct MemoryAllocation {
    /// Start of the block.
    pub ptr: *const u8,
    /// Requested length in bytes.
    pub len: usize,
    /// Length actually reserved, rounded up to `alignment`.
    pub capacity: usize,
    /// Page size the block was allocated with.
    pub alignment: usize,
}

impl MemoryAllocation {
    /// Address of the first byte, as handed to an address-exposure mechanism.
    pub fn address(&self) -> u64 {
        self.ptr as usize as u64
    }

    /// Number of pages of `alignment` bytes covering the block.
    pub fn pages(&self) -> usize {
        self.capacity / self.alignment
    }
}
