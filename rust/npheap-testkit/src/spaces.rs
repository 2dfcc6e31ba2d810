use std::{
    ops::Range,
    sync::atomic::{AtomicUsize, Ordering},
};

use npheap::{AddressSpace, Storage};

/// An address space whose host rejects every exposure.
#[derive(Default)]
pub struct RejectingAddressSpace {
    attempts: AtomicUsize,
}

impl RejectingAddressSpace {
    pub fn new() -> RejectingAddressSpace {
        RejectingAddressSpace::default()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl AddressSpace for RejectingAddressSpace {
    fn expose(&self, _storage: &Storage, range: Range<u64>) -> std::io::Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            format!("host refused [{:#x}, {:#x})", range.start, range.end),
        ))
    }
}
