//! Usage reporting and lightweight counters.
//!
//! Keep this optional and cheap. The log helpers compile to nothing without
//! the `tracing` feature; [`UsageCounters`] is a ready-made
//! [`MonitorHooks`] for callers that just want numbers.

use std::sync::atomic::{AtomicU64, Ordering};

use bytemon_core::{MonitorHooks, Resource};

/// Gauge + high-water counters fed by a monitor.
#[derive(Debug, Default)]
pub struct UsageCounters {
    current: AtomicU64,
    peak: AtomicU64,
    last_max: AtomicU64,
    stops: AtomicU64,
}

impl UsageCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes currently allocated on the monitor(s) feeding this counter.
    pub fn current(&self) -> u64 {
        self.current.load(Ordering::Relaxed)
    }

    /// Largest value `current` has reached.
    pub fn peak(&self) -> u64 {
        self.peak.load(Ordering::Relaxed)
    }

    /// High-water mark reported by the most recent stop.
    pub fn last_recorded_max(&self) -> u64 {
        self.last_max.load(Ordering::Relaxed)
    }

    pub fn stops(&self) -> u64 {
        self.stops.load(Ordering::Relaxed)
    }

    fn record_peak(&self, used: u64) {
        let mut cur = self.peak.load(Ordering::Relaxed);
        while used > cur {
            match self
                .peak
                .compare_exchange(cur, used, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => break,
                Err(observed) => cur = observed,
            }
        }
    }
}

impl MonitorHooks for UsageCounters {
    fn bytes_reserved(&self, bytes: u64) {
        let now = self.current.fetch_add(bytes, Ordering::AcqRel) + bytes;
        self.record_peak(now);
    }

    fn bytes_released(&self, bytes: u64) {
        self.current.fetch_sub(bytes, Ordering::AcqRel);
    }

    fn record_max_usage(&self, max_bytes: u64) {
        self.last_max.store(max_bytes, Ordering::Relaxed);
        self.stops.fetch_add(1, Ordering::Relaxed);
    }
}

/// True when going from `before` to `after` changes the power-of-two
/// magnitude. Limits log volume when usage creeps up in small steps.
pub(crate) fn crosses_magnitude(before: u64, after: u64) -> bool {
    before.checked_next_power_of_two() != after.checked_next_power_of_two()
}

#[cfg(feature = "tracing")]
pub(crate) fn usage_increased(name: &str, resource: Resource, allocated: u64, delta: u64) {
    tracing::info!(
        monitor = name,
        %resource,
        allocated,
        delta,
        "bytes usage increases"
    );
}

#[cfg(not(feature = "tracing"))]
pub(crate) fn usage_increased(_name: &str, _resource: Resource, _allocated: u64, _delta: u64) {}

#[cfg(feature = "tracing")]
pub(crate) fn request_refused(name: &str, requested: u64, allocated: u64, budget: u64) {
    tracing::debug!(monitor = name, requested, allocated, budget, "budget exceeded");
}

#[cfg(not(feature = "tracing"))]
pub(crate) fn request_refused(_name: &str, _requested: u64, _allocated: u64, _budget: u64) {}

#[cfg(feature = "tracing")]
pub(crate) fn parent_budget_changed(name: &str, grew: bool, bytes: u64, budget: u64) {
    tracing::trace!(monitor = name, grew, bytes, budget, "parent budget adjusted");
}

#[cfg(not(feature = "tracing"))]
pub(crate) fn parent_budget_changed(_name: &str, _grew: bool, _bytes: u64, _budget: u64) {}

#[cfg(feature = "tracing")]
pub(crate) fn monitor_started(name: &str, parent: Option<&str>, reserved: u64) {
    tracing::debug!(monitor = name, parent, reserved, "monitor started");
}

#[cfg(not(feature = "tracing"))]
pub(crate) fn monitor_started(_name: &str, _parent: Option<&str>, _reserved: u64) {}

#[cfg(feature = "tracing")]
pub(crate) fn monitor_stopped(name: &str, max_allocated: u64) {
    tracing::debug!(monitor = name, max_allocated, "monitor stopped");
}

#[cfg(not(feature = "tracing"))]
pub(crate) fn monitor_stopped(_name: &str, _max_allocated: u64) {}

#[cfg(feature = "tracing")]
pub(crate) fn leaked_on_stop(name: &str, resource: Resource, leftover: u64) {
    tracing::error!(
        monitor = name,
        %resource,
        leftover,
        "emergency stop with bytes still allocated"
    );
}

#[cfg(not(feature = "tracing"))]
pub(crate) fn leaked_on_stop(_name: &str, _resource: Resource, _leftover: u64) {}

#[cfg(feature = "tracing")]
pub(crate) fn stale_account_closed(name: &str, used: u64) {
    tracing::warn!(
        monitor = name,
        used,
        "account closed after its monitor was stopped"
    );
}

#[cfg(not(feature = "tracing"))]
pub(crate) fn stale_account_closed(_name: &str, _used: u64) {}
