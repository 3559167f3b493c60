//! Standalone budgets: fixed capacity with no parent behind it.
//!
//! The other budget source, an account bound to a parent monitor, is
//! [`BoundAccount`](crate::BoundAccount).

use bytemon_core::BudgetSource;
use serde::Serialize;

/// A fixed pool handed to [`BytesMonitor::start`](crate::BytesMonitor::start).
///
/// A root monitor gets all of its capacity from here. A child monitor may
/// also get one as a pre-reserved floor that it can use before it ever asks
/// its parent for anything.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StandaloneBudget {
    capacity: u64,
}

impl StandaloneBudget {
    pub const fn new(capacity: u64) -> Self {
        Self { capacity }
    }
}

impl BudgetSource for StandaloneBudget {
    fn allocated(&self) -> u64 {
        self.capacity
    }
}
