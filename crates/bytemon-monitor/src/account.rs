//! Accounts: per-consumer usage charged against a monitor.
//!
//! A [`BytesAccount`] is a bare running total; every operation on it goes
//! through the monitor it was opened on. A [`BoundAccount`] carries its
//! monitor and releases its usage on drop (panic-safe).
//!
//! Accounts have no lock. Each one must be driven by a single owner; the
//! monitor is the synchronization point.

use std::fmt;
use std::sync::Arc;

use bytemon_core::BudgetSource;

use crate::error::Result;
use crate::monitor::BytesMonitor;

/// Usage of one consumer on one monitor.
///
/// Only the monitor mutates `used`, and always in lockstep with its own
/// allocated total. An account that is not open on any monitor must be
/// empty.
#[derive(Debug, Default)]
pub struct BytesAccount {
    pub(crate) used: u64,
}

impl BytesAccount {
    pub const fn new() -> Self {
        Self { used: 0 }
    }

    /// Bytes currently charged to this account.
    pub fn used(&self) -> u64 {
        self.used
    }
}

/// An account that remembers the monitor it is open on.
///
/// Dropping it clears it, so bytes charged through a `BoundAccount` cannot
/// outlive it. After an [`emergency_stop`](BytesMonitor::emergency_stop)
/// the monitor has already written its bytes off; dropping it then releases
/// nothing.
pub struct BoundAccount {
    account: BytesAccount,
    mon: Arc<BytesMonitor>,
    generation: u64,
}

impl BoundAccount {
    pub(crate) fn open(mon: Arc<BytesMonitor>) -> Self {
        let mut account = BytesAccount::new();
        mon.open_account(&mut account);
        let generation = mon.generation();
        Self {
            account,
            mon,
            generation,
        }
    }

    pub fn used(&self) -> u64 {
        self.account.used
    }

    pub fn monitor(&self) -> &Arc<BytesMonitor> {
        &self.mon
    }

    /// Charge `bytes` more. On error nothing changes.
    pub fn grow(&mut self, bytes: u64) -> Result<()> {
        self.refresh();
        self.mon.grow_account(&mut self.account, bytes)
    }

    /// Give back `bytes`. Panics if the account holds less than that.
    pub fn shrink(&mut self, bytes: u64) {
        if self.refresh() {
            return;
        }
        self.mon.shrink_account(&mut self.account, bytes)
    }

    /// Replace an item previously charged at `old_size` by one of `new_size`.
    pub fn resize_item(&mut self, old_size: u64, new_size: u64) -> Result<()> {
        if self.refresh() {
            return self.mon.grow_account(&mut self.account, new_size);
        }
        self.mon.resize_item(&mut self.account, old_size, new_size)
    }

    /// Set the whole account to `new_size`.
    pub fn resize(&mut self, new_size: u64) -> Result<()> {
        self.refresh();
        let old_size = self.account.used;
        self.mon.resize_item(&mut self.account, old_size, new_size)
    }

    pub fn clear(&mut self) {
        self.refresh();
        self.mon.clear_account(&mut self.account)
    }

    /// Writes off usage left over from before the monitor's last stop.
    /// Returns true if the account was stale.
    fn refresh(&mut self) -> bool {
        self.mon.write_off_stale(&mut self.account, &mut self.generation)
    }

    /// Release everything and detach from the monitor.
    pub fn close(self) {
        drop(self)
    }
}

impl BudgetSource for BoundAccount {
    fn allocated(&self) -> u64 {
        self.account.used
    }
}

impl Drop for BoundAccount {
    fn drop(&mut self) {
        if self.account.used > 0 {
            self.mon.close_account_from(&mut self.account, self.generation);
        }
    }
}

impl fmt::Debug for BoundAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundAccount")
            .field("used", &self.account.used)
            .field("monitor", &self.mon.name())
            .finish()
    }
}
