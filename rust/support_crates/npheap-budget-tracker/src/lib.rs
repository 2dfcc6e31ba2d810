//! A byte budget shared by every allocation of a heap.
//!
//! Allocations withdraw from the budget and return their amount when dropped,
//! so the remaining budget always reflects the storage that is still alive.

use std::sync::Arc;

use counter::Counter;

pub mod counter;

/// Represents a budget that can be allocated from.
#[derive(Clone)]
pub struct Budget(Arc<BudgetInner>);

struct BudgetInner {
    capacity: u64,
    remaining: Counter,
}

impl Budget {
    /// Creates a budget of `capacity` bytes.
    pub fn new(capacity: u64) -> Budget {
        Budget(Arc::new(BudgetInner {
            capacity,
            remaining: Counter::new(capacity),
        }))
    }

    pub fn capacity(&self) -> u64 {
        self.0.capacity
    }

    /// Returns the remaining amount in this budget.
    ///
    /// **Note**: intended for diagnostics; the value may be outdated in a
    /// concurrent environment.
    pub fn remaining(&self) -> u64 {
        self.0.remaining.read()
    }

    /// Attempts to allocate `amount` from the budget.
    ///
    /// The amount is returned to the budget when the `Allocation` is dropped.
    pub fn allocate(&self, amount: u64) -> Result<Allocation, AllocationError> {
        if self.0.remaining.withdraw(amount) {
            Ok(Allocation {
                budget: self.0.clone(),
                amount,
            })
        } else {
            Err(AllocationError {
                requested: amount,
                remaining: self.remaining(),
            })
        }
    }
}

impl std::fmt::Debug for Budget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Budget")
            .field("capacity", &self.capacity())
            .field("remaining", &self.remaining())
            .finish()
    }
}

/// An amount withdrawn from a [`Budget`].
pub struct Allocation {
    budget: Arc<BudgetInner>,
    amount: u64,
}

impl Allocation {
    pub fn amount(&self) -> u64 {
        self.amount
    }
}

impl Drop for Allocation {
    fn drop(&mut self) {
        if self.amount != 0 {
            self.budget.remaining.deposit(self.amount);
        }
    }
}

impl std::fmt::Debug for Allocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Allocation")
            .field("amount", &self.amount)
            .finish_non_exhaustive()
    }
}

/// An error that occurs when a budget allocation fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AllocationError {
    pub requested: u64,
    pub remaining: u64,
}

impl std::fmt::Display for AllocationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "budget exhausted: requested {} bytes, {} remaining",
            self.requested, self.remaining
        )
    }
}

impl std::error::Error for AllocationError {}

impl From<AllocationError> for std::io::Error {
    fn from(e: AllocationError) -> Self {
        std::io::Error::new(std::io::ErrorKind::OutOfMemory, e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budget_creation() {
        let budget = Budget::new(100);
        assert_eq!(budget.capacity(), 100);
        assert_eq!(budget.remaining(), 100);
    }

    #[test]
    fn test_allocate_success() {
        let budget = Budget::new(100);
        let allocation = budget.allocate(60).unwrap();
        assert_eq!(allocation.amount(), 60);
        assert_eq!(budget.remaining(), 40);
    }

    #[test]
    fn test_allocate_failure() {
        let budget = Budget::new(100);
        let _held = budget.allocate(80).unwrap();
        let err = budget.allocate(30).unwrap_err();
        assert_eq!(
            err,
            AllocationError {
                requested: 30,
                remaining: 20
            }
        );
        assert_eq!(budget.remaining(), 20);
    }

    #[test]
    fn test_allocation_drop_returns_amount() {
        let budget = Budget::new(100);
        {
            let _a = budget.allocate(50).unwrap();
            let _b = budget.clone().allocate(50).unwrap();
            assert_eq!(budget.remaining(), 0);
        }
        assert_eq!(budget.remaining(), 100);
    }

    #[test]
    fn test_error_into_io() {
        let budget = Budget::new(1);
        let err: std::io::Error = budget.allocate(2).unwrap_err().into();
        assert_eq!(err.kind(), std::io::ErrorKind::OutOfMemory);
    }
}
