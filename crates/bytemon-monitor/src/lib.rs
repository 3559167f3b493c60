#![forbid(unsafe_code)]
//! bytemon-monitor: hierarchical byte accounting with hard ceilings.
//!
//! This crate provides the concrete monitor behind the interfaces in
//! `bytemon-core`. A [`BytesMonitor`] enforces a ceiling and draws capacity
//! either from a fixed [`StandaloneBudget`] or, in chunks, from a parent
//! monitor. Consumers charge usage through a [`BytesAccount`] (caller-owned,
//! passed to the monitor) or a [`BoundAccount`] (carries its monitor and
//! releases on drop).
//!
//! No memory is ever allocated on behalf of callers here; only byte counts
//! are admitted or refused.

pub mod account;
pub mod budget;
pub mod error;
pub mod monitor;
pub mod tracking;

pub use account::{BoundAccount, BytesAccount};
pub use budget::StandaloneBudget;
pub use error::{Error, Result};
pub use monitor::{BytesMonitor, MonitorStats};
pub use tracking::UsageCounters;

pub use bytemon_core::{BudgetSource, MonitorHooks, MonitorSettings, NoopHooks, Resource};
