#![forbid(unsafe_code)]
//! bytemon-core: shared vocabulary for hierarchical byte monitors.
//!
//! Only interfaces and plain data live here. The enforcing monitor, the
//! accounts and the reservation protocol live in `bytemon-monitor`, so any
//! crate can name a [`Resource`] or implement [`MonitorHooks`] without
//! pulling in the locking code.

pub mod budget;
pub mod config;
pub mod error;
pub mod hooks;
pub mod prelude;
pub mod resource;

pub use budget::BudgetSource;
pub use config::MonitorSettings;
pub use error::{Error, Result};
pub use hooks::{MonitorHooks, NoopHooks};
pub use resource::Resource;
