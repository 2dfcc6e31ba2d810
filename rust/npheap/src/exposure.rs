//! Exposure of backing storage within a caller's address space.

use std::{collections::BTreeMap, ops::Range, sync::Mutex};

use crate::storage::Storage;

/// The host mechanism that makes backing storage visible over an address
/// range of the calling process.
pub trait AddressSpace: Send + Sync {
    /// Backs `range` with `storage`, starting at the storage's first byte.
    ///
    /// `range` is page-aligned and no longer than the storage capacity. The
    /// implementation keeps a clone of `storage` for as long as the range
    /// stays exposed.
    fn expose(&self, storage: &Storage, range: Range<u64>) -> std::io::Result<()>;
}

/// An in-process address space: a page-granular table of exposed ranges.
///
/// Each caller (process) owns its own table. Ranges may not overlap; an
/// exposure holds its storage alive until it is withdrawn or the table is
/// dropped.
pub struct ExposureTable {
    page_size: u64,
    entries: Mutex<BTreeMap<u64, Exposure>>,
}

struct Exposure {
    end: u64,
    storage: Storage,
}

impl ExposureTable {
    pub fn new(page_size: u64) -> ExposureTable {
        assert!(page_size.is_power_of_two());
        ExposureTable {
            page_size,
            entries: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn page_size(&self) -> u64 {
        self.page_size
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Exposed ranges in address order.
    pub fn ranges(&self) -> Vec<Range<u64>> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .map(|(&start, e)| start..e.end)
            .collect()
    }

    /// Resolves `address` to the storage exposed there and the offset of
    /// `address` within it.
    pub fn resolve(&self, address: u64) -> Option<(Storage, u64)> {
        let entries = self.entries.lock().unwrap();
        let (&start, exposure) = entries.range(..=address).next_back()?;
        (address < exposure.end).then(|| (exposure.storage.clone(), address - start))
    }

    /// Removes the exposure starting at `start`, dropping its storage handle.
    ///
    /// Returns `false` if nothing is exposed at `start`.
    pub fn withdraw(&self, start: u64) -> bool {
        self.entries.lock().unwrap().remove(&start).is_some()
    }

    /// Removes every exposure.
    pub fn clear(&self) {
        self.entries.lock().unwrap().clear();
    }
}

impl AddressSpace for ExposureTable {
    fn expose(&self, storage: &Storage, range: Range<u64>) -> std::io::Result<()> {
        use std::io::{Error, ErrorKind};

        if range.start >= range.end {
            return Err(Error::new(ErrorKind::InvalidInput, "empty range"));
        }
        if !range.start.is_multiple_of(self.page_size) || !range.end.is_multiple_of(self.page_size)
        {
            return Err(Error::new(ErrorKind::InvalidInput, "range is not page-aligned"));
        }
        if range.end - range.start > storage.capacity() {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                format!(
                    "range of {} bytes exceeds storage of {} bytes",
                    range.end - range.start,
                    storage.capacity()
                ),
            ));
        }

        let mut entries = self.entries.lock().unwrap();
        if let Some((&start, prev)) = entries.range(..range.end).next_back() {
            if prev.end > range.start {
                return Err(Error::new(
                    ErrorKind::AddrInUse,
                    format!("range conflict with [{start:#x}, {:#x})", prev.end),
                ));
            }
        }
        entries.insert(
            range.start,
            Exposure {
                end: range.end,
                storage: storage.clone(),
            },
        );
        Ok(())
    }
}

impl std::fmt::Debug for ExposureTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExposureTable")
            .field("page_size", &self.page_size)
            .field("ranges", &self.ranges())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{BackingAllocator, PageAllocator};

    fn page() -> u64 {
        npheap_page_alloc::page_size() as u64
    }

    fn storage(size: u64) -> Storage {
        PageAllocator::unlimited().allocate(size).unwrap()
    }

    #[test]
    fn test_expose_and_resolve() {
        let p = page();
        let table = ExposureTable::new(p);
        let s = storage(2 * p);
        table.expose(&s, 16 * p..18 * p).unwrap();
        assert_eq!(table.ranges(), vec![16 * p..18 * p]);

        let (found, offset) = table.resolve(17 * p + 0x10).unwrap();
        assert!(found.same_buffer(&s));
        assert_eq!(offset, p + 0x10);
        assert!(table.resolve(18 * p).is_none());
        assert!(table.resolve(15 * p).is_none());
    }

    #[test]
    fn test_rejects_conflicts() {
        let p = page();
        let table = ExposureTable::new(p);
        let s = storage(2 * p);
        table.expose(&s, 16 * p..18 * p).unwrap();

        let err = table.expose(&s, 17 * p..18 * p).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::AddrInUse);
        let err = table.expose(&s, 15 * p..17 * p).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::AddrInUse);

        table.expose(&s, 18 * p..19 * p).unwrap();
        table.expose(&s, 15 * p..16 * p).unwrap();
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn test_rejects_unaligned_and_oversized() {
        let p = page();
        let table = ExposureTable::new(p);
        let s = storage(p);
        assert!(table.expose(&s, 16 * p + 0x10..17 * p).is_err());
        assert!(table.expose(&s, 16 * p..16 * p).is_err());
        assert!(table.expose(&s, 16 * p..18 * p).is_err());
        assert!(table.is_empty());
    }

    #[test]
    fn test_exposure_holds_storage() {
        let p = page();
        let table = ExposureTable::new(p);
        let s = storage(p);
        table.expose(&s, 0..p).unwrap();
        assert_eq!(s.holders(), 2);
        assert!(table.withdraw(0));
        assert!(!table.withdraw(0));
        assert_eq!(s.holders(), 1);

        table.expose(&s, 0..p).unwrap();
        table.clear();
        assert_eq!(s.holders(), 1);
    }
}
