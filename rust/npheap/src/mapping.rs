//! The mapping service: lazy allocation plus exposure of an object.

use std::ops::Range;

use log::{debug, warn};
use npheap_common::{Result, error::Error, verify_arg};

use crate::{exposure::AddressSpace, registry::Registry, storage::BackingAllocator};

/// A request to expose object `offset` over `[dest_start, dest_start + length)`
/// of the caller's address space.
///
/// `offset` is already a page index and is used as the key unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MappingRequest {
    pub offset: u64,
    pub length: u64,
    pub dest_start: u64,
}

impl MappingRequest {
    pub fn new(offset: u64, length: u64, dest_start: u64) -> MappingRequest {
        MappingRequest {
            offset,
            length,
            dest_start,
        }
    }

    pub fn key(&self) -> u64 {
        self.offset
    }

    pub fn validate(&self, page_size: u64) -> Result<()> {
        verify_arg!(length, self.length != 0);
        verify_arg!(dest_start, self.dest_start.is_multiple_of(page_size));
        verify_arg!(
            length,
            self.dest_start
                .checked_add(self.length)
                .and_then(|end| end.checked_next_multiple_of(page_size))
                .is_some()
        );
        Ok(())
    }

    /// The destination range, rounded up to whole pages.
    ///
    /// Only meaningful for a request that passed [`validate`](Self::validate).
    pub fn dest_range(&self, page_size: u64) -> Range<u64> {
        let end = (self.dest_start + self.length).next_multiple_of(page_size);
        self.dest_start..end
    }
}

/// A successful exposure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mapping {
    pub key: u64,
    /// Size of the object, which is the length of its first mapping.
    pub size: u64,
    pub range: Range<u64>,
    /// Whether this request allocated the object's storage.
    pub allocated: bool,
}

/// Exposes the storage of `request.key()` in `space`, creating the object and
/// allocating `request.length` zeroed bytes for it on first use.
///
/// If exposure fails the storage stays attached to the object; only the
/// request fails.
///
/// A request longer than the storage the object already has fails with
/// `ExposureFailed` instead of exposing a shorter range.
pub fn map_object(
    registry: &Registry,
    allocator: &dyn BackingAllocator,
    space: &dyn AddressSpace,
    page_size: u64,
    request: &MappingRequest,
) -> Result<Mapping> {
    request.validate(page_size)?;
    let key = request.key();
    let object = registry.get_or_insert(key);

    let (storage, allocated) = object
        .ensure_storage(request.length, allocator)
        .map_err(|e| {
            warn!("object {key}: allocation of {} bytes failed: {e}", request.length);
            Error::allocation_failed(key, request.length, e)
        })?;

    let range = request.dest_range(page_size);
    if let Err(e) = space.expose(&storage, range.clone()) {
        warn!(
            "object {key}: exposure at [{:#x}, {:#x}) rejected: {e}",
            range.start, range.end
        );
        return Err(Error::exposure_failed(key, range.start, range.end, e.to_string()));
    }
    debug!(
        "object {key}: exposed {} bytes at [{:#x}, {:#x})",
        storage.len(),
        range.start,
        range.end
    );

    Ok(Mapping {
        key,
        size: object.size(),
        range,
        allocated,
    })
}
