//! Observability collaborators invoked by a monitor.
//!
//! A monitor holds an `Arc<dyn MonitorHooks>` and calls it on every change
//! of its allocated total. Wire these up to a gauge/histogram in the binary
//! layer; the default does nothing.

/// Callbacks fired by a monitor. All methods default to no-ops.
///
/// Hooks are called while the monitor's lock is held, so implementations
/// must be cheap and must never call back into a monitor.
pub trait MonitorHooks: Send + Sync {
    /// `bytes` were added to the monitor's allocated total.
    fn bytes_reserved(&self, _bytes: u64) {}

    /// `bytes` were removed from the monitor's allocated total.
    fn bytes_released(&self, _bytes: u64) {}

    /// The monitor is stopping; `max_bytes` is its high-water mark.
    fn record_max_usage(&self, _max_bytes: u64) {}
}

/// Hooks that ignore every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHooks;

impl MonitorHooks for NoopHooks {}
