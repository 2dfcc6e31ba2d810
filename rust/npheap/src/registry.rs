//! The directory of live memory objects.
//!
//! A single `RwLock` guards the key → object map and is held only for the
//! lookup or insertion itself. Everything done to an object afterwards goes
//! through the object's own locks, so requests for different keys contend
//! only on that brief map access.
//!
//! Records are never replaced: once a key is inserted the same
//! [`MemoryObject`] (and thus the same advisory lock) serves every request
//! for it until [`Registry::drain_all`]. Deleting a key resets its record to
//! zero size instead of unlinking it.

use std::{
    collections::BTreeMap,
    sync::{Arc, RwLock},
};

use log::{debug, trace};
use npheap_common::{Result, error::Error};

use crate::object::{MemoryObject, ObjectInfo};

#[derive(Default)]
pub struct Registry {
    objects: RwLock<BTreeMap<u64, Arc<MemoryObject>>>,
}

/// Outcome of [`Registry::drain_all`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub objects: usize,
    pub bytes_freed: u64,
}

impl Registry {
    pub fn new() -> Registry {
        Registry::default()
    }

    pub fn find(&self, key: u64) -> Option<Arc<MemoryObject>> {
        let found = self.objects.read().unwrap().get(&key).cloned();
        trace!("find {key}: {}", if found.is_some() { "hit" } else { "miss" });
        found
    }

    /// Like [`find`](Self::find), failing with `NotFound` for an unknown key.
    pub fn get(&self, key: u64) -> Result<Arc<MemoryObject>> {
        self.find(key).ok_or_else(|| Error::not_found(key))
    }

    /// Returns the object for `key`, creating an empty one if there is none.
    ///
    /// Concurrent first references to the same key all receive the same object.
    pub fn get_or_insert(&self, key: u64) -> Arc<MemoryObject> {
        if let Some(object) = self.find(key) {
            return object;
        }
        let mut objects = self.objects.write().unwrap();
        objects
            .entry(key)
            .or_insert_with(|| {
                debug!("object {key}: created");
                Arc::new(MemoryObject::new(key))
            })
            .clone()
    }

    /// Frees the storage of `key` and resets its size to 0.
    ///
    /// The record stays registered, so later lookups see a zero-size object.
    /// Returns the number of bytes released.
    pub fn remove(&self, key: u64) -> Result<u64> {
        Ok(self.get(key)?.release_storage())
    }

    /// Frees every object's storage and empties the registry.
    ///
    /// Taking `&mut self` makes this exclusive with every other registry
    /// operation; callers stop accepting requests before reaching it.
    pub fn drain_all(&mut self) -> DrainReport {
        let objects = std::mem::take(self.objects.get_mut().unwrap());
        let mut report = DrainReport::default();
        for (_, object) in objects {
            report.objects += 1;
            report.bytes_freed += object.release_storage();
        }
        report
    }

    pub fn len(&self) -> usize {
        self.objects.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn keys(&self) -> Vec<u64> {
        self.objects.read().unwrap().keys().copied().collect()
    }

    /// Describes every object, in key order.
    pub fn snapshot(&self) -> Vec<ObjectInfo> {
        let objects: Vec<_> = self.objects.read().unwrap().values().cloned().collect();
        objects.iter().map(|o| o.info()).collect()
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("objects", &self.snapshot())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Barrier;

    use npheap_common::error::ErrorKind;

    use super::*;
    use crate::storage::PageAllocator;

    #[test]
    fn test_get_or_insert_returns_same_object() {
        let registry = Registry::new();
        assert!(registry.find(5).is_none());
        let a = registry.get_or_insert(5);
        let b = registry.get_or_insert(5);
        assert!(Arc::ptr_eq(&a, &b));
        assert!(Arc::ptr_eq(&a, &registry.find(5).unwrap()));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_concurrent_first_reference() {
        let registry = Registry::new();
        let barrier = Barrier::new(16);
        let objects: Vec<Arc<MemoryObject>> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..16)
                .map(|_| {
                    s.spawn(|| {
                        barrier.wait();
                        registry.get_or_insert(42)
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert_eq!(registry.len(), 1);
        assert!(objects.iter().all(|o| Arc::ptr_eq(o, &objects[0])));
    }

    #[test]
    fn test_remove_resets_record() {
        let registry = Registry::new();
        let object = registry.get_or_insert(3);
        object
            .ensure_storage(4096, &PageAllocator::unlimited())
            .unwrap();

        assert_eq!(registry.remove(3).unwrap(), 4096);
        let found = registry.find(3).unwrap();
        assert!(Arc::ptr_eq(&found, &object));
        assert_eq!(found.size(), 0);
        assert_eq!(registry.remove(3).unwrap(), 0);

        let err = registry.remove(4).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::NotFound { key: 4 }));
    }

    #[test]
    fn test_drain_all() {
        let mut registry = Registry::new();
        let allocator = PageAllocator::unlimited();
        for key in [1, 2, 3] {
            registry
                .get_or_insert(key)
                .ensure_storage(key * 1000, &allocator)
                .unwrap();
        }
        registry.get_or_insert(4);

        let report = registry.drain_all();
        assert_eq!(
            report,
            DrainReport {
                objects: 4,
                bytes_freed: 6000
            }
        );
        assert!(registry.is_empty());
        for key in 1..=4 {
            assert!(registry.find(key).is_none());
        }
    }

    #[test]
    fn test_snapshot_in_key_order() {
        let registry = Registry::new();
        for key in [30, 10, 20] {
            registry.get_or_insert(key);
        }
        registry
            .get_or_insert(20)
            .ensure_storage(64, &PageAllocator::unlimited())
            .unwrap();
        registry.get_or_insert(30).advisory_lock().lock();

        assert_eq!(registry.keys(), vec![10, 20, 30]);
        let snapshot = registry.snapshot();
        assert_eq!(
            snapshot,
            vec![
                ObjectInfo {
                    key: 10,
                    size: 0,
                    locked: false
                },
                ObjectInfo {
                    key: 20,
                    size: 64,
                    locked: false
                },
                ObjectInfo {
                    key: 30,
                    size: 0,
                    locked: true
                },
            ]
        );
    }
}
