use bytemon_core::Resource;
use thiserror::Error;

/// Result type local to bytemon-monitor.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// The named monitor refused an increase. `budget` is what that monitor
    /// could offer without asking further up the chain.
    #[error("{monitor}: {resource} budget exceeded: {requested} bytes requested, {allocated} currently allocated, {budget} bytes in budget")]
    BudgetExceeded {
        monitor: String,
        resource: Resource,
        requested: u64,
        allocated: u64,
        budget: u64,
    },
}

impl Error {
    /// Name of the monitor that refused the request.
    pub fn monitor(&self) -> &str {
        match self {
            Error::BudgetExceeded { monitor, .. } => monitor,
        }
    }
}
