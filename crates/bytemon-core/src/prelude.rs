//! Convenient re-exports for downstream crates.

pub use crate::budget::BudgetSource;
pub use crate::config::MonitorSettings;
pub use crate::error::{Error, Result};
pub use crate::hooks::{MonitorHooks, NoopHooks};
pub use crate::resource::Resource;
