//! A shared, on-demand heap of memory objects.
//!
//! Callers name a region by a numeric key (its page offset). The first
//! mapping of a key allocates zero-filled backing storage and exposes it in
//! the caller's address space; later mappings of the same key expose the
//! same storage. Each object also carries an advisory lock that cooperating
//! callers use to serialize access to the region's contents, and can be
//! queried for its size or deleted.
//!
//! - [`registry`]: the key → [`object::MemoryObject`] directory
//! - [`mapping`]: lazy allocation and exposure of an object
//! - [`control`]: the Lock / Unlock / GetSize / Delete commands
//! - [`device`]: startup, request dispatch and teardown

pub mod advisory_lock;
pub mod config;
pub mod control;
pub mod device;
pub mod exposure;
pub mod mapping;
pub mod object;
pub mod registry;
pub mod storage;

pub use config::DeviceConfig;
pub use control::{Command, RawCommand, Reply};
pub use device::{Device, DeviceStats, ShutdownReport};
pub use exposure::{AddressSpace, ExposureTable};
pub use mapping::{Mapping, MappingRequest};
pub use npheap_common::error::{Error, ErrorKind};
pub use npheap_common::Result;
pub use object::{MemoryObject, ObjectInfo};
pub use registry::Registry;
pub use storage::{BackingAllocator, PageAllocator, Storage};
