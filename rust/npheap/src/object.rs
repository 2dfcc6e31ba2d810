use std::sync::Mutex;

use log::debug;

use crate::{
    advisory_lock::AdvisoryLock,
    storage::{BackingAllocator, Storage},
};

/// One region of the heap.
///
/// The `slot` mutex is the object's internal consistency lock: checking for
/// storage, allocating it and publishing it happen under it as a single step,
/// and so does freeing it. The advisory lock is independent of it and is
/// never taken by the heap itself.
pub struct MemoryObject {
    key: u64,
    slot: Mutex<Slot>,
    lock: AdvisoryLock,
}

#[derive(Default)]
struct Slot {
    /// 0 while no storage is attached.
    size: u64,
    storage: Option<Storage>,
}

/// Point-in-time description of an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectInfo {
    pub key: u64,
    pub size: u64,
    pub locked: bool,
}

impl MemoryObject {
    pub fn new(key: u64) -> MemoryObject {
        MemoryObject {
            key,
            slot: Mutex::new(Slot::default()),
            lock: AdvisoryLock::new(),
        }
    }

    pub fn key(&self) -> u64 {
        self.key
    }

    pub fn size(&self) -> u64 {
        self.slot.lock().unwrap().size
    }

    pub fn storage(&self) -> Option<Storage> {
        self.slot.lock().unwrap().storage.clone()
    }

    pub fn is_allocated(&self) -> bool {
        self.slot.lock().unwrap().storage.is_some()
    }

    pub fn advisory_lock(&self) -> &AdvisoryLock {
        &self.lock
    }

    /// Returns the attached storage, allocating `length` zeroed bytes first if
    /// there is none.
    ///
    /// The flag is `true` when this call performed the allocation. An existing
    /// allocation is returned as is, whatever `length` is. On allocation
    /// failure the object stays without storage.
    pub fn ensure_storage(
        &self,
        length: u64,
        allocator: &dyn BackingAllocator,
    ) -> std::io::Result<(Storage, bool)> {
        let mut slot = self.slot.lock().unwrap();
        if let Some(storage) = slot.storage.as_ref() {
            return Ok((storage.clone(), false));
        }
        let storage = allocator.allocate(length)?;
        debug!("object {}: allocated {length} bytes", self.key);
        slot.size = length;
        slot.storage = Some(storage.clone());
        Ok((storage, true))
    }

    /// Detaches the storage and resets the size to 0.
    ///
    /// Returns the number of bytes released. The memory itself is freed once
    /// every exposure of it is withdrawn.
    pub fn release_storage(&self) -> u64 {
        let mut slot = self.slot.lock().unwrap();
        let released = std::mem::take(&mut *slot);
        drop(slot);
        match released.storage {
            Some(storage) => {
                debug!(
                    "object {}: released {} bytes ({} other holders)",
                    self.key,
                    released.size,
                    storage.holders() - 1
                );
                released.size
            }
            None => 0,
        }
    }

    pub fn info(&self) -> ObjectInfo {
        ObjectInfo {
            key: self.key,
            size: self.size(),
            locked: self.lock.is_locked(),
        }
    }
}

impl std::fmt::Debug for MemoryObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryObject")
            .field("key", &self.key)
            .field("size", &self.size())
            .field("locked", &self.lock.is_locked())
            .finish()
    }
}
