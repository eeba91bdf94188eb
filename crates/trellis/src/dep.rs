#![forbid(unsafe_code)]

//! Per-property dependency registries.
//!
//! Every reactive cell owns one [`Dep`]: the list of watchers that read the
//! cell's property during their last evaluation. The registry lives as long
//! as the property does — replacing the property's *value* keeps the same
//! registry; only rebuilding a subtree mints fresh ones.
//!
//! # Design
//!
//! `Dep` is a cheap-clone handle (`Rc` inside). Subscribers are held as
//! `Weak` references paired with their [`WatcherId`], so a registry never
//! keeps an abandoned watcher alive; dead entries are pruned lazily during
//! notification. Registration order is preserved and is the notification
//! order.
//!
//! # Invariants
//!
//! 1. [`add_sub`](Dep::add_sub) appends unconditionally — duplicate
//!    prevention is the watcher's job, keyed by [`DepId`].
//! 2. [`notify`](Dep::notify) runs entirely within the caller's stack:
//!    every dependent watcher has re-evaluated and fired its callback
//!    before `notify` returns.
//! 3. [`depend`](Dep::depend) is a no-op unless an evaluation is active.

use std::cell::RefCell;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, trace};

use crate::scope;
use crate::watcher::{Watcher, WatcherId, WatcherInner};

static NEXT_DEP_ID: AtomicU64 = AtomicU64::new(1);

fn next_dep_id() -> DepId {
    DepId(NEXT_DEP_ID.fetch_add(1, Ordering::Relaxed))
}

/// Total number of notification passes performed.
static NOTIFICATIONS_TOTAL: AtomicU64 = AtomicU64::new(0);

/// Read the total notification-pass count (for diagnostics/telemetry).
#[must_use]
pub fn notifications_total() -> u64 {
    NOTIFICATIONS_TOTAL.load(Ordering::Relaxed)
}

/// Unique identifier for a dependency registry.
///
/// Watchers key their dependency sets by `DepId`, which is what makes
/// re-registration within a single evaluation idempotent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DepId(u64);

impl DepId {
    /// Get the raw id value.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

struct SubEntry {
    id: WatcherId,
    watcher: Weak<WatcherInner>,
}

struct DepInner {
    id: DepId,
    /// Property key this registry guards, kept as a label for tracing.
    key: Rc<str>,
    subs: RefCell<Vec<SubEntry>>,
}

/// A per-property dependency registry.
///
/// Cloning a `Dep` creates a new handle to the **same** registry.
#[derive(Clone)]
pub struct Dep {
    inner: Rc<DepInner>,
}

impl Dep {
    pub(crate) fn new(key: &str) -> Self {
        Self {
            inner: Rc::new(DepInner {
                id: next_dep_id(),
                key: Rc::from(key),
                subs: RefCell::new(Vec::new()),
            }),
        }
    }

    /// This registry's identity.
    #[must_use]
    pub fn id(&self) -> DepId {
        self.inner.id
    }

    /// The property key this registry guards.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.inner.key
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn sub_count(&self) -> usize {
        self.inner
            .subs
            .borrow()
            .iter()
            .filter(|s| s.watcher.strong_count() > 0)
            .count()
    }

    /// Append a watcher to the subscriber list.
    ///
    /// Appends unconditionally; callers are responsible for not registering
    /// the same watcher twice (watchers dedup by [`DepId`]).
    pub fn add_sub(&self, watcher: &Watcher) {
        self.add_sub_inner(watcher.id(), watcher.downgrade());
    }

    pub(crate) fn add_sub_inner(&self, id: WatcherId, watcher: Weak<WatcherInner>) {
        trace!(
            dep_id = self.inner.id.raw(),
            key = %self.inner.key,
            watcher_id = id.raw(),
            "subscriber added"
        );
        self.inner.subs.borrow_mut().push(SubEntry { id, watcher });
    }

    /// Remove the first subscriber entry matching `id`, if any.
    pub fn remove_sub(&self, id: WatcherId) {
        let mut subs = self.inner.subs.borrow_mut();
        if let Some(pos) = subs.iter().position(|s| s.id == id) {
            subs.remove(pos);
            trace!(
                dep_id = self.inner.id.raw(),
                key = %self.inner.key,
                watcher_id = id.raw(),
                "subscriber removed"
            );
        }
    }

    /// Register this registry with the currently evaluating watcher.
    ///
    /// Delegates to the active watcher's `add_dep`, which performs the
    /// actual (idempotent) edge creation. No-op when no evaluation is
    /// active — plain reads outside an evaluation track nothing.
    pub fn depend(&self) {
        scope::with_active(|watcher| watcher.add_dep(self.clone()));
    }

    /// Synchronously re-run every subscriber, in registration order.
    ///
    /// The subscriber list is snapshotted first (pruning dead entries), so
    /// callbacks are free to write properties, register new watchers, or
    /// tear down existing ones without invalidating the pass.
    pub fn notify(&self) {
        NOTIFICATIONS_TOTAL.fetch_add(1, Ordering::Relaxed);
        let live: Vec<Rc<WatcherInner>> = {
            let mut subs = self.inner.subs.borrow_mut();
            subs.retain(|s| s.watcher.strong_count() > 0);
            subs.iter().filter_map(|s| s.watcher.upgrade()).collect()
        };
        debug!(
            dep_id = self.inner.id.raw(),
            key = %self.inner.key,
            subscribers = live.len(),
            "notifying"
        );
        for watcher in live {
            watcher.update();
        }
    }
}

impl std::fmt::Debug for Dep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dep")
            .field("id", &self.inner.id)
            .field("key", &self.inner.key)
            .field("subs", &self.inner.subs.borrow().len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observe::observe;
    use crate::value::Value;
    use crate::watcher::Watcher;
    use std::cell::Cell;

    fn root_with_a() -> crate::observe::Observed {
        observe(Value::object([("a", 1)])).unwrap()
    }

    #[test]
    fn ids_are_unique() {
        let d1 = Dep::new("x");
        let d2 = Dep::new("x");
        assert_ne!(d1.id(), d2.id());
    }

    #[test]
    fn depend_is_noop_outside_evaluation() {
        let dep = Dep::new("orphan");
        dep.depend();
        assert_eq!(dep.sub_count(), 0);
    }

    #[test]
    fn remove_sub_is_noop_when_absent() {
        let root = root_with_a();
        let watcher = Watcher::with_path(&root, "a", |_, _| {}).unwrap();
        let dep = Dep::new("unrelated");
        dep.remove_sub(watcher.id());
        assert_eq!(dep.sub_count(), 0);
    }

    #[test]
    fn add_sub_appends_unconditionally() {
        let root = root_with_a();
        let watcher = Watcher::with_path(&root, "a", |_, _| {}).unwrap();
        let dep = Dep::new("manual");
        dep.add_sub(&watcher);
        dep.add_sub(&watcher);
        assert_eq!(dep.sub_count(), 2);
        dep.remove_sub(watcher.id());
        assert_eq!(dep.sub_count(), 1);
    }

    #[test]
    fn notify_reaches_subscribers_in_registration_order() {
        let root = observe(Value::object([("a", 1)])).unwrap();
        let order = Rc::new(RefCell::new(Vec::new()));

        let o1 = Rc::clone(&order);
        let w1 = Watcher::with_path(&root, "a", move |_, _| o1.borrow_mut().push(1)).unwrap();
        let o2 = Rc::clone(&order);
        let w2 = Watcher::with_path(&root, "a", move |_, _| o2.borrow_mut().push(2)).unwrap();

        root.set("a", 2);
        assert_eq!(*order.borrow(), vec![1, 2]);
        drop((w1, w2));
    }

    #[test]
    fn dead_subscribers_are_pruned_during_notify() {
        let root = root_with_a();
        let fired = Rc::new(Cell::new(0u32));

        {
            let fired = Rc::clone(&fired);
            let _dropped =
                Watcher::with_path(&root, "a", move |_, _| fired.set(fired.get() + 1)).unwrap();
        }

        let dep = root.cell("a").unwrap().dep().clone();
        assert_eq!(dep.sub_count(), 0);

        root.set("a", 2);
        assert_eq!(fired.get(), 0);
    }

    #[test]
    fn notifications_counter_increments() {
        let before = notifications_total();
        let root = root_with_a();
        root.set("a", 2);
        assert!(notifications_total() > before);
    }
}
