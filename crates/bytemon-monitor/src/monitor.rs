//! The enforcing monitor and its chunked reservation protocol.
//!
//! A monitor's capacity is `reserved + budget`, where `reserved` is a fixed
//! [`StandaloneBudget`] handed over at start and `budget` is a
//! [`BoundAccount`] on the parent monitor. When a request does not fit, the
//! shortfall is rounded up to a multiple of `pool_allocation_size` and taken
//! from the parent in one step. On release, capacity beyond
//! `max_allocated_but_unused_blocks` spare chunks is handed back.
//!
//! Lock order is child before parent: a monitor calls into its parent only
//! while holding its own lock, and a parent never calls into a child.

use std::fmt;
use std::sync::Arc;

use bytemon_core::{BudgetSource, MonitorHooks, MonitorSettings, NoopHooks, Resource};
use parking_lot::Mutex;
use serde::Serialize;

use crate::account::{BoundAccount, BytesAccount};
use crate::budget::StandaloneBudget;
use crate::error::{Error, Result};
use crate::tracking;

/// Point-in-time view of a monitor, read under its lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MonitorStats {
    /// Sum of the usage of all open accounts.
    pub allocated: u64,
    /// High-water mark of `allocated` since start.
    pub max_allocated: u64,
    /// Capacity currently drawn from the parent.
    pub budget: u64,
    /// Standalone capacity handed over at start.
    pub reserved: u64,
    pub limit: u64,
}

impl MonitorStats {
    /// Everything this monitor can hand out without asking its parent.
    pub fn capacity(&self) -> u64 {
        self.budget.saturating_add(self.reserved)
    }
}

#[derive(Default)]
struct MonitorState {
    started: bool,
    /// Bumped by every stop. Accounts opened before a stop belong to an
    /// older generation and no longer hold bytes here.
    generation: u64,
    cur_allocated: u64,
    max_allocated: u64,
    /// Chunked capacity held from the parent; `None` for a root monitor.
    cur_budget: Option<BoundAccount>,
    reserved: StandaloneBudget,
}

impl MonitorState {
    fn budget_allocated(&self) -> u64 {
        self.cur_budget.as_ref().map_or(0, |b| b.allocated())
    }

    fn available(&self) -> u64 {
        self.budget_allocated()
            .saturating_add(self.reserved.allocated())
    }
}

/// Enforces a ceiling on the bytes charged by its accounts.
///
/// Always shared behind an `Arc`: accounts, child monitors and concurrent
/// callers all refer to the same instance.
pub struct BytesMonitor {
    name: String,
    resource: Resource,
    limit: u64,
    pool_allocation_size: u64,
    noteworthy_usage_bytes: u64,
    settings: MonitorSettings,
    hooks: Arc<dyn MonitorHooks>,
    mu: Mutex<MonitorState>,
}

impl BytesMonitor {
    /// Create an inert monitor. No capacity is held until [`start`](Self::start).
    ///
    /// `pool_allocation_size` is the chunk requested from the parent whenever
    /// the monitor runs short; 0 is treated as 1.
    pub fn new(
        name: impl Into<String>,
        resource: Resource,
        pool_allocation_size: u64,
        noteworthy_usage_bytes: u64,
        settings: MonitorSettings,
    ) -> Self {
        Self::with_limit(
            name,
            resource,
            u64::MAX,
            pool_allocation_size,
            noteworthy_usage_bytes,
            settings,
        )
    }

    /// Like [`new`](Self::new), but the monitor never admits more than
    /// `limit` bytes regardless of how much its parent could give.
    pub fn with_limit(
        name: impl Into<String>,
        resource: Resource,
        limit: u64,
        pool_allocation_size: u64,
        noteworthy_usage_bytes: u64,
        settings: MonitorSettings,
    ) -> Self {
        Self {
            name: name.into(),
            resource,
            limit,
            pool_allocation_size: pool_allocation_size.max(1),
            noteworthy_usage_bytes,
            settings,
            hooks: Arc::new(NoopHooks),
            mu: Mutex::new(MonitorState::default()),
        }
    }

    /// Chunk size and noteworthy threshold taken from `settings`, which
    /// must pass [`MonitorSettings::validate`].
    pub fn from_settings(
        name: impl Into<String>,
        resource: Resource,
        settings: &MonitorSettings,
    ) -> bytemon_core::Result<Self> {
        settings.validate()?;
        Ok(Self::new(
            name,
            resource,
            settings.pool_allocation_size,
            settings.noteworthy_usage_bytes,
            *settings,
        ))
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn MonitorHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn resource(&self) -> Resource {
        self.resource
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    pub fn pool_allocation_size(&self) -> u64 {
        self.pool_allocation_size
    }

    pub fn settings(&self) -> &MonitorSettings {
        &self.settings
    }

    /// Bytes currently charged to this monitor.
    pub fn allocated(&self) -> u64 {
        self.mu.lock().cur_allocated
    }

    /// High-water mark since the monitor was started.
    pub fn maximum_bytes(&self) -> u64 {
        self.mu.lock().max_allocated
    }

    pub fn stats(&self) -> MonitorStats {
        let st = self.mu.lock();
        MonitorStats {
            allocated: st.cur_allocated,
            max_allocated: st.max_allocated,
            budget: st.budget_allocated(),
            reserved: st.reserved.allocated(),
            limit: self.limit,
        }
    }

    /// Bind the monitor to its capacity: chunks from `parent` (if any) on
    /// top of the fixed `reserved` budget.
    ///
    /// The parent must stay started until this monitor is stopped.
    ///
    /// # Panics
    ///
    /// If the monitor is already started.
    pub fn start(&self, parent: Option<&Arc<BytesMonitor>>, reserved: StandaloneBudget) {
        let mut st = self.mu.lock();
        assert!(
            !st.started,
            "{}: started again without being stopped",
            self.name
        );
        st.started = true;
        st.reserved = reserved;
        st.cur_budget = parent.map(BytesMonitor::make_bound_account);
        tracking::monitor_started(
            &self.name,
            parent.map(|p| p.name()),
            reserved.allocated(),
        );
    }

    /// Return all capacity to the parent and reset the monitor.
    ///
    /// # Panics
    ///
    /// If any bytes are still allocated, i.e. some account was not closed.
    pub fn stop(&self) {
        self.do_stop(true)
    }

    /// Like [`stop`](Self::stop), but leftover bytes are logged and
    /// discarded. Accounts still holding bytes must not be used afterwards.
    pub fn emergency_stop(&self) {
        self.do_stop(false)
    }

    fn do_stop(&self, check: bool) {
        let mut st = self.mu.lock();
        if st.cur_allocated != 0 {
            assert!(
                !check,
                "{}: unexpected {} leftover bytes",
                self.name, st.cur_allocated
            );
            tracking::leaked_on_stop(&self.name, self.resource, st.cur_allocated);
            self.hooks.bytes_released(st.cur_allocated);
        }

        self.hooks.record_max_usage(st.max_allocated);
        tracking::monitor_stopped(&self.name, st.max_allocated);

        // Dropping the bound account gives its bytes back to the parent.
        drop(st.cur_budget.take());
        *st = MonitorState {
            generation: st.generation + 1,
            ..MonitorState::default()
        };
    }

    /// Open `account` on this monitor. No capacity is reserved yet.
    ///
    /// # Panics
    ///
    /// If the account still holds bytes.
    pub fn open_account(&self, account: &mut BytesAccount) {
        assert_eq!(
            account.used, 0,
            "{}: opening a non-empty account",
            self.name
        );
    }

    pub(crate) fn generation(&self) -> u64 {
        self.mu.lock().generation
    }

    /// Close an account opened in `generation`. If the monitor has been
    /// stopped since, its bytes were already written off and nothing is
    /// released.
    pub(crate) fn close_account_from(&self, account: &mut BytesAccount, generation: u64) {
        let mut st = self.mu.lock();
        if st.generation != generation {
            tracking::stale_account_closed(&self.name, account.used);
            account.used = 0;
            return;
        }
        let used = account.used;
        self.release_locked(&mut st, used);
        account.used = 0;
    }

    /// Zero an account opened before the last stop and move it to the
    /// current generation. Returns true if it was stale.
    pub(crate) fn write_off_stale(
        &self,
        account: &mut BytesAccount,
        generation: &mut u64,
    ) -> bool {
        let st = self.mu.lock();
        if st.generation == *generation {
            return false;
        }
        if account.used > 0 {
            tracking::stale_account_closed(&self.name, account.used);
        }
        account.used = 0;
        *generation = st.generation;
        true
    }

    pub fn make_bound_account(self: &Arc<Self>) -> BoundAccount {
        BoundAccount::open(Arc::clone(self))
    }

    /// Charge `extra` bytes to `account`. On error neither the account nor
    /// the monitor changes.
    pub fn grow_account(&self, account: &mut BytesAccount, extra: u64) -> Result<()> {
        if extra == 0 {
            return Ok(());
        }
        self.reserve_bytes(extra)?;
        account.used += extra;
        Ok(())
    }

    /// Give back `delta` bytes from `account`.
    ///
    /// # Panics
    ///
    /// If the account holds less than `delta`.
    pub fn shrink_account(&self, account: &mut BytesAccount, delta: u64) {
        assert!(
            account.used >= delta,
            "{}: no bytes to release in account, current {}, free {}",
            self.name,
            account.used,
            delta
        );
        if delta == 0 {
            return;
        }
        self.release_bytes(delta);
        account.used -= delta;
    }

    /// Replace an item charged at `old_size` by one of `new_size`.
    ///
    /// Shrinking never fails. The caller vouches that `old_size` was
    /// previously charged to this account; the monitor only sees totals.
    pub fn resize_item(
        &self,
        account: &mut BytesAccount,
        old_size: u64,
        new_size: u64,
    ) -> Result<()> {
        debug_assert!(
            old_size <= account.used,
            "{}: resizing an item of {} bytes in an account of {}",
            self.name,
            old_size,
            account.used
        );
        if new_size > old_size {
            self.grow_account(account, new_size - old_size)
        } else {
            self.shrink_account(account, old_size - new_size);
            Ok(())
        }
    }

    /// Release everything charged to `account`; it stays open and empty.
    pub fn clear_account(&self, account: &mut BytesAccount) {
        let used = account.used;
        self.shrink_account(account, used);
    }

    pub fn close_account(&self, account: &mut BytesAccount) {
        self.clear_account(account);
    }

    /// Admit `x` more bytes, drawing a new chunk from the parent if the
    /// current capacity is short.
    pub fn reserve_bytes(&self, x: u64) -> Result<()> {
        let mut st = self.mu.lock();

        let total = match st.cur_allocated.checked_add(x) {
            Some(total) if total <= self.limit => total,
            _ => {
                let budget = self.limit.min(st.available());
                return Err(self.budget_exceeded(x, st.cur_allocated, budget));
            }
        };

        let available = st.available();
        if total > available {
            self.increase_budget(&mut st, x, total - available)?;
        }

        st.cur_allocated = total;
        self.hooks.bytes_reserved(x);
        if total > st.max_allocated {
            st.max_allocated = total;
        }

        if total > self.noteworthy_usage_bytes && tracking::crosses_magnitude(total - x, total) {
            tracking::usage_increased(&self.name, self.resource, total, x);
        }
        Ok(())
    }

    /// Give back `x` bytes and return surplus chunks to the parent.
    ///
    /// # Panics
    ///
    /// If fewer than `x` bytes are allocated.
    pub fn release_bytes(&self, x: u64) {
        let mut st = self.mu.lock();
        self.release_locked(&mut st, x);
    }

    fn release_locked(&self, st: &mut MonitorState, x: u64) {
        assert!(
            st.cur_allocated >= x,
            "{}: no bytes to release, current {}, free {}",
            self.name,
            st.cur_allocated,
            x
        );
        st.cur_allocated -= x;
        self.hooks.bytes_released(x);
        self.adjust_budget(st);
    }

    fn increase_budget(&self, st: &mut MonitorState, requested: u64, min_extra: u64) -> Result<()> {
        let allocated = st.cur_allocated;
        let available = st.available();
        let Some(budget) = st.cur_budget.as_mut() else {
            return Err(self.budget_exceeded(requested, allocated, available));
        };

        let extra = self.round_size(min_extra);
        budget.grow(extra)?;
        tracking::parent_budget_changed(&self.name, true, extra, budget.used());
        Ok(())
    }

    fn adjust_budget(&self, st: &mut MonitorState) {
        let reserved = st.reserved.allocated();
        let needed = if st.cur_allocated <= reserved {
            0
        } else {
            self.round_size(st.cur_allocated - reserved)
        };
        let margin = self
            .pool_allocation_size
            .saturating_mul(self.settings.max_allocated_but_unused_blocks);
        let keep = needed.saturating_add(margin);

        if let Some(budget) = st.cur_budget.as_mut() {
            let held = budget.used();
            if held > keep {
                budget.shrink(held - keep);
                tracking::parent_budget_changed(&self.name, false, held - keep, keep);
            }
        }
    }

    /// Round up to a whole number of chunks; falls back to `sz` itself when
    /// rounding would overflow.
    fn round_size(&self, sz: u64) -> u64 {
        sz.checked_next_multiple_of(self.pool_allocation_size)
            .unwrap_or(sz)
    }

    fn budget_exceeded(&self, requested: u64, allocated: u64, budget: u64) -> Error {
        tracking::request_refused(&self.name, requested, allocated, budget);
        Error::BudgetExceeded {
            monitor: self.name.clone(),
            resource: self.resource,
            requested,
            allocated,
            budget,
        }
    }
}

impl fmt::Debug for BytesMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BytesMonitor")
            .field("name", &self.name)
            .field("resource", &self.resource)
            .field("limit", &self.limit)
            .field("pool_allocation_size", &self.pool_allocation_size)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracking::UsageCounters;

    fn settings(blocks: u64) -> MonitorSettings {
        MonitorSettings::default().with_max_allocated_but_unused_blocks(blocks)
    }

    fn pool(limit: u64) -> Arc<BytesMonitor> {
        let p = Arc::new(BytesMonitor::new("pool", Resource::MEMORY, 1, 1000, settings(1)));
        p.start(None, StandaloneBudget::new(limit));
        p
    }

    #[test]
    fn reserve_and_release_track_high_water() {
        let m = pool(100);
        m.reserve_bytes(10).unwrap();
        assert!(m.reserve_bytes(91).is_err());
        m.reserve_bytes(90).unwrap();
        assert_eq!(m.allocated(), 100);

        m.release_bytes(90);
        assert_eq!(m.allocated(), 10);
        assert_eq!(m.maximum_bytes(), 100);

        m.release_bytes(10);
        assert_eq!(m.allocated(), 0);
        m.stop();
        assert_eq!(m.maximum_bytes(), 0);
    }

    #[test]
    fn child_draws_rounded_chunks_from_parent() {
        let parent = pool(1000);
        let child = Arc::new(BytesMonitor::new("child", Resource::MEMORY, 64, 1000, settings(1)));
        child.start(Some(&parent), StandaloneBudget::default());

        child.reserve_bytes(10).unwrap();
        assert_eq!(parent.allocated(), 64);
        assert_eq!(child.stats().budget, 64);

        // Fits in the chunk already held: no trip to the parent.
        child.reserve_bytes(50).unwrap();
        assert_eq!(parent.allocated(), 64);

        child.reserve_bytes(5).unwrap();
        assert_eq!(parent.allocated(), 128);

        child.release_bytes(65);
        // One spare chunk may stay behind.
        assert_eq!(parent.allocated(), 64);

        child.stop();
        assert_eq!(parent.allocated(), 0);
        parent.stop();
    }

    #[test]
    fn pre_reserved_budget_is_used_before_parent() {
        let parent = pool(100);
        let child = Arc::new(BytesMonitor::new("child", Resource::MEMORY, 1, 1000, settings(1)));
        child.start(Some(&parent), StandaloneBudget::new(20));

        child.reserve_bytes(20).unwrap();
        assert_eq!(parent.allocated(), 0);
        child.reserve_bytes(30).unwrap();
        assert_eq!(parent.allocated(), 30);

        let stats = child.stats();
        assert_eq!(stats.allocated, 50);
        assert_eq!(stats.capacity(), 50);

        child.release_bytes(50);
        assert!(parent.allocated() <= 1);
        child.stop();
        assert_eq!(parent.allocated(), 0);
        parent.stop();
    }

    #[test]
    fn large_slack_keeps_chunks() {
        let parent = pool(10_000);
        let child = Arc::new(BytesMonitor::new("child", Resource::MEMORY, 100, 1000, settings(10)));
        child.start(Some(&parent), StandaloneBudget::default());

        child.reserve_bytes(950).unwrap();
        assert_eq!(parent.allocated(), 1000);
        child.release_bytes(950);
        assert_eq!(parent.allocated(), 1000);

        child.reserve_bytes(1500).unwrap();
        assert_eq!(parent.allocated(), 1500);
        child.release_bytes(1500);
        assert_eq!(parent.allocated(), 1000);

        child.stop();
        assert_eq!(parent.allocated(), 0);
        parent.stop();
    }

    #[test]
    fn parent_refusal_leaves_child_untouched() {
        let parent = pool(50);
        let child = Arc::new(BytesMonitor::new("child", Resource::MEMORY, 10, 1000, settings(1)));
        child.start(Some(&parent), StandaloneBudget::default());

        child.reserve_bytes(35).unwrap();
        let before = child.stats();
        let err = child.reserve_bytes(20).unwrap_err();
        assert_eq!(err.monitor(), "pool");
        assert_eq!(child.stats(), before);
        assert_eq!(parent.allocated(), 40);

        child.release_bytes(35);
        child.stop();
        parent.stop();
    }

    #[test]
    fn limit_applies_before_parent() {
        let parent = pool(u64::MAX);
        let child = Arc::new(BytesMonitor::with_limit(
            "limited",
            Resource::MEMORY,
            10,
            1,
            1000,
            settings(1),
        ));
        child.start(Some(&parent), StandaloneBudget::default());
        child.reserve_bytes(10).unwrap();
        match child.reserve_bytes(1) {
            Err(Error::BudgetExceeded {
                monitor,
                requested,
                allocated,
                budget,
                ..
            }) => {
                assert_eq!(monitor, "limited");
                assert_eq!(requested, 1);
                assert_eq!(allocated, 10);
                assert_eq!(budget, 10);
            }
            other => panic!("unexpected result: {other:?}"),
        }
        child.release_bytes(10);
        child.stop();
        parent.stop();
    }

    #[test]
    fn hooks_see_every_change() {
        let counters = Arc::new(UsageCounters::new());
        let m = Arc::new(
            BytesMonitor::new("hooked", Resource::DISK, 1, 1000, settings(1))
                .with_hooks(counters.clone()),
        );
        m.start(None, StandaloneBudget::new(100));
        let mut a = BytesAccount::new();
        m.grow_account(&mut a, 70).unwrap();
        m.resize_item(&mut a, 70, 20).unwrap();
        assert_eq!(counters.current(), 20);
        assert_eq!(counters.peak(), 70);
        m.close_account(&mut a);
        m.stop();
        assert_eq!(counters.current(), 0);
        assert_eq!(counters.last_recorded_max(), 70);
    }

    #[test]
    fn from_settings_rejects_invalid_settings() {
        let bad = MonitorSettings {
            pool_allocation_size: 0,
            ..MonitorSettings::default()
        };
        assert!(matches!(
            BytesMonitor::from_settings("bad", Resource::MEMORY, &bad),
            Err(bytemon_core::Error::Config(_))
        ));
        assert!(BytesMonitor::from_settings("bad", Resource::MEMORY, &settings(0)).is_err());

        let m = BytesMonitor::from_settings("ok", Resource::MEMORY, &settings(3)).unwrap();
        assert_eq!(m.pool_allocation_size(), 10 * 1024);
        assert_eq!(m.settings().max_allocated_but_unused_blocks, 3);
    }

    #[cfg(feature = "tracing")]
    #[test]
    fn noteworthy_usage_is_logged_per_magnitude() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use tracing_subscriber::layer::{Context, SubscriberExt};
        use tracing_subscriber::Layer;

        struct InfoCounter(Arc<AtomicUsize>);

        impl<S: tracing::Subscriber> Layer<S> for InfoCounter {
            fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
                if *event.metadata().level() == tracing::Level::INFO {
                    self.0.fetch_add(1, Ordering::SeqCst);
                }
            }
        }

        let infos = Arc::new(AtomicUsize::new(0));
        let subscriber = tracing_subscriber::registry().with(InfoCounter(infos.clone()));
        tracing::subscriber::with_default(subscriber, || {
            let m = BytesMonitor::new("noisy", Resource::MEMORY, 1, 100, settings(1));
            m.start(None, StandaloneBudget::new(10_000));

            // Below the threshold nothing is reported.
            m.reserve_bytes(50).unwrap();
            assert_eq!(infos.load(Ordering::SeqCst), 0);

            // 50 -> 110 crosses both the threshold and a power of two.
            m.reserve_bytes(60).unwrap();
            assert_eq!(infos.load(Ordering::SeqCst), 1);

            // 110 -> 120 stays within 128.
            m.reserve_bytes(10).unwrap();
            assert_eq!(infos.load(Ordering::SeqCst), 1);

            // 120 -> 140 moves past 128.
            m.reserve_bytes(20).unwrap();
            assert_eq!(infos.load(Ordering::SeqCst), 2);

            m.release_bytes(140);
            m.stop();
        });
    }

    #[test]
    fn stats_serialize_for_reporting() {
        let m = pool(100);
        m.reserve_bytes(30).unwrap();
        let json = serde_json::to_value(m.stats()).unwrap();
        assert_eq!(json["allocated"], 30);
        assert_eq!(json["reserved"], 100);
        assert_eq!(json["budget"], 0);
        m.release_bytes(30);
        m.stop();
    }

    #[test]
    fn monitor_can_restart_after_stop() {
        let m = pool(10);
        m.reserve_bytes(10).unwrap();
        m.release_bytes(10);
        m.stop();
        m.start(None, StandaloneBudget::new(20));
        m.reserve_bytes(20).unwrap();
        m.release_bytes(20);
        m.stop();
    }

    #[test]
    fn emergency_stop_discards_leftovers() {
        let parent = pool(100);
        let child = Arc::new(BytesMonitor::new("child", Resource::MEMORY, 1, 1000, settings(1)));
        child.start(Some(&parent), StandaloneBudget::default());
        child.reserve_bytes(40).unwrap();
        child.emergency_stop();
        assert_eq!(child.allocated(), 0);
        assert_eq!(parent.allocated(), 0);
        parent.stop();
    }

    #[test]
    #[should_panic(expected = "leftover bytes")]
    fn stop_with_open_usage_panics() {
        let m = pool(100);
        m.reserve_bytes(1).unwrap();
        m.stop();
    }

    #[test]
    #[should_panic(expected = "started again")]
    fn double_start_panics() {
        let m = pool(100);
        m.start(None, StandaloneBudget::new(100));
    }

    #[test]
    #[should_panic(expected = "no bytes to release")]
    fn over_release_panics() {
        let m = pool(100);
        m.reserve_bytes(5).unwrap();
        m.release_bytes(6);
    }
}
