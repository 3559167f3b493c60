//! Abstract budget source interface.
//!
//! The concrete sources live in `bytemon-monitor`: a fixed standalone pool
//! and an account bound to a parent monitor. We keep only the trait here so
//! invariant checks can be written against either.

/// Somewhere a monitor draws capacity from.
pub trait BudgetSource {
    /// Bytes this source currently makes available to its monitor.
    fn allocated(&self) -> u64;
}

