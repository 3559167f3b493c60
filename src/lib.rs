#![forbid(unsafe_code)]
//! bytemon: hierarchical byte accounting and budget enforcement.
//!
//! Facade over the workspace crates. See `bytemon-monitor` for the monitor
//! and accounts, `bytemon-core` for settings, hooks and resource tags.

pub use bytemon_core::{MonitorHooks, MonitorSettings, NoopHooks, Resource};
pub use bytemon_monitor::{
    BoundAccount, BytesAccount, BytesMonitor, Error, MonitorStats, Result, StandaloneBudget,
    UsageCounters,
};
