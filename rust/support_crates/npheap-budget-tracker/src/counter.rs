use std::sync::atomic::{AtomicU64, Ordering};

/// A thread-safe counter that concurrent consumers withdraw from and deposit
/// into, never letting the value go negative.
pub struct Counter(AtomicU64);

impl Counter {
    pub fn new(amount: u64) -> Counter {
        Counter(AtomicU64::new(amount))
    }

    /// Subtracts `amount` if at least that much remains.
    ///
    /// Returns `false` and leaves the counter unchanged otherwise.
    pub fn withdraw(&self, amount: u64) -> bool {
        let mut current = self.0.load(Ordering::Relaxed);
        while current >= amount {
            match self.0.compare_exchange_weak(
                current,
                current - amount,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(updated) => current = updated,
            }
        }
        false
    }

    pub fn deposit(&self, amount: u64) {
        self.0.fetch_add(amount, Ordering::Release);
    }

    /// Returns the counter value (most likely stale by the time it is observed by the caller).
    pub fn read(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}
