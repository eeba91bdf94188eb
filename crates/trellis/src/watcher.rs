#![forbid(unsafe_code)]

//! Expression watchers.
//!
//! A [`Watcher`] binds an expression — a parsed dot path or an arbitrary
//! resolver closure — to a callback. It discovers its own dependencies:
//! during evaluation the watcher occupies the active evaluation context,
//! and every cell read that happens anywhere under the resolver registers
//! that cell's registry with it. No subscription API is involved; the
//! dependency graph wires itself as a side effect of reading.
//!
//! # Dependency lifecycle
//!
//! The dependency set is cleared and rebuilt on **every** evaluation:
//! registries read this pass are kept (or newly subscribed), registries not
//! re-read are dropped. A resolver with a conditional branch therefore
//! stops receiving notifications from the branch it no longer reads.
//! Edges are symmetric — the watcher holds each registry it subscribes to,
//! and [`teardown`](Watcher::teardown) severs everything at once.
//!
//! # Invariants
//!
//! 1. A watcher appears in any registry's subscriber list at most once
//!    (registration is idempotent per [`DepId`] within an evaluation).
//! 2. After evaluation, the dependency set holds exactly one entry per
//!    distinct registry traversed, however many times each was read.
//! 3. The callback fires only on identity changes, as `(new, old)`, within
//!    the stack of the write that triggered it.
//! 4. A torn-down watcher never evaluates or fires again.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use ahash::AHashMap;
use tracing::{debug, trace};

use crate::dep::{Dep, DepId};
use crate::observe::Observed;
use crate::path::{PathError, PathExpr};
use crate::scope;
use crate::value::Value;

static NEXT_WATCHER_ID: AtomicU64 = AtomicU64::new(1);

fn next_watcher_id() -> WatcherId {
    WatcherId(NEXT_WATCHER_ID.fetch_add(1, Ordering::Relaxed))
}

/// Total number of watcher evaluations performed.
static EVALUATIONS_TOTAL: AtomicU64 = AtomicU64::new(0);

/// Read the total evaluation count (for diagnostics/telemetry).
#[must_use]
pub fn evaluations_total() -> u64 {
    EVALUATIONS_TOTAL.load(Ordering::Relaxed)
}

/// Unique identifier for a watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatcherId(u64);

impl WatcherId {
    /// Get the raw id value.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

enum Resolver {
    Path(PathExpr),
    Func(Box<dyn Fn(&Observed) -> Value>),
}

pub(crate) struct WatcherInner {
    id: WatcherId,
    root: Observed,
    resolver: Resolver,
    callback: Box<dyn Fn(&Value, &Value)>,
    /// Cached result of the last evaluation.
    value: RefCell<Value>,
    /// Committed dependency set from the last completed evaluation.
    deps: RefCell<AHashMap<DepId, Dep>>,
    /// In-progress set while an evaluation is collecting.
    collecting: RefCell<Option<AHashMap<DepId, Dep>>>,
    torn_down: Cell<bool>,
    me: Weak<WatcherInner>,
}

impl WatcherInner {
    /// One full evaluation: occupy the scope, run the resolver, commit the
    /// rebuilt dependency set. Returns the resolved value without touching
    /// the cache.
    fn evaluate(&self) -> Value {
        EVALUATIONS_TOTAL.fetch_add(1, Ordering::Relaxed);
        *self.collecting.borrow_mut() = Some(AHashMap::new());
        let value = {
            let _guard = scope::enter(self.id, self.me.clone());
            match &self.resolver {
                Resolver::Path(path) => path.resolve(&self.root),
                Resolver::Func(func) => func(&self.root),
            }
        };
        self.commit_deps();
        value
    }

    /// Swap in the freshly collected dependency set, unsubscribing from
    /// registries that were not re-read this pass.
    fn commit_deps(&self) {
        let Some(new_deps) = self.collecting.borrow_mut().take() else {
            return;
        };
        let mut deps = self.deps.borrow_mut();
        let mut dropped = 0usize;
        for (id, dep) in deps.iter() {
            if !new_deps.contains_key(id) {
                dep.remove_sub(self.id);
                dropped += 1;
            }
        }
        trace!(
            watcher_id = self.id.raw(),
            deps = new_deps.len(),
            dropped,
            "dependency set committed"
        );
        *deps = new_deps;
    }

    /// Idempotent dependency registration, called through
    /// [`Dep::depend`](crate::dep::Dep::depend) while this watcher is
    /// evaluating.
    pub(crate) fn add_dep(&self, dep: Dep) {
        if self.torn_down.get() {
            return;
        }
        let mut collecting = self.collecting.borrow_mut();
        if let Some(set) = collecting.as_mut() {
            if set.contains_key(&dep.id()) {
                return;
            }
            // Already subscribed from a previous evaluation: keep the edge,
            // just carry it into the new set.
            if !self.deps.borrow().contains_key(&dep.id()) {
                dep.add_sub_inner(self.id, self.me.clone());
            }
            set.insert(dep.id(), dep);
        } else {
            // Direct registration outside any evaluation.
            let mut deps = self.deps.borrow_mut();
            if !deps.contains_key(&dep.id()) {
                dep.add_sub_inner(self.id, self.me.clone());
                deps.insert(dep.id(), dep);
            }
        }
    }

    /// Re-evaluate and fire the callback if the resolved value's identity
    /// changed.
    pub(crate) fn update(&self) {
        if self.torn_down.get() {
            return;
        }
        let new = self.evaluate();
        let old = self.value.borrow().clone();
        if Value::same_identity(&new, &old) {
            return;
        }
        *self.value.borrow_mut() = new.clone();
        debug!(watcher_id = self.id.raw(), "value changed, firing callback");
        (self.callback)(&new, &old);
    }
}

/// An expression bound to a callback, re-run whenever any of its discovered
/// dependencies change.
///
/// Cloning a `Watcher` creates a new handle to the **same** watcher.
/// Registries hold only weak references, so dropping every handle leaves
/// the watcher to be pruned lazily; [`teardown`](Watcher::teardown)
/// detaches it deterministically instead.
#[derive(Clone)]
pub struct Watcher {
    inner: Rc<WatcherInner>,
}

impl Watcher {
    /// Watch a dot-path expression. Parsing is strict; a malformed
    /// expression is a [`PathError`], not a silently dead watcher.
    ///
    /// The first evaluation runs immediately, seeding the cached value and
    /// wiring the initial dependency set. The callback is not invoked for
    /// the seed.
    pub fn with_path(
        root: &Observed,
        path: &str,
        callback: impl Fn(&Value, &Value) + 'static,
    ) -> Result<Self, PathError> {
        let expr = PathExpr::parse(path)?;
        Ok(Self::with_expr(root, expr, callback))
    }

    /// Watch an already-parsed path expression.
    pub fn with_expr(
        root: &Observed,
        expr: PathExpr,
        callback: impl Fn(&Value, &Value) + 'static,
    ) -> Self {
        Self::build(root.clone(), Resolver::Path(expr), Box::new(callback))
    }

    /// Watch an arbitrary resolver closure. Every tracked read the closure
    /// performs against the root (directly or transitively) becomes a
    /// dependency.
    pub fn with_fn(
        root: &Observed,
        getter: impl Fn(&Observed) -> Value + 'static,
        callback: impl Fn(&Value, &Value) + 'static,
    ) -> Self {
        Self::build(
            root.clone(),
            Resolver::Func(Box::new(getter)),
            Box::new(callback),
        )
    }

    fn build(root: Observed, resolver: Resolver, callback: Box<dyn Fn(&Value, &Value)>) -> Self {
        let inner = Rc::new_cyclic(|me| WatcherInner {
            id: next_watcher_id(),
            root,
            resolver,
            callback,
            value: RefCell::new(Value::Null),
            deps: RefCell::new(AHashMap::new()),
            collecting: RefCell::new(None),
            torn_down: Cell::new(false),
            me: me.clone(),
        });
        let seed = inner.evaluate();
        debug!(
            watcher_id = inner.id.raw(),
            deps = inner.deps.borrow().len(),
            "watcher seeded"
        );
        *inner.value.borrow_mut() = seed;
        Self { inner }
    }

    /// This watcher's identity.
    #[must_use]
    pub fn id(&self) -> WatcherId {
        self.inner.id
    }

    /// Evaluate the expression now, rewiring dependencies as a side effect.
    /// Returns the resolved value; the cached value is left untouched.
    #[must_use]
    pub fn get(&self) -> Value {
        self.inner.evaluate()
    }

    /// Re-evaluate, and fire the callback as `(new, old)` if the resolved
    /// value's identity changed. Invoked by registries on notification;
    /// callable directly to force a re-check.
    pub fn update(&self) {
        self.inner.update();
    }

    /// Register a dependency edge by hand. Idempotent per registry id —
    /// the same dedup that evaluation-time discovery uses.
    pub fn add_dep(&self, dep: &Dep) {
        self.inner.add_dep(dep.clone());
    }

    /// Detach from every registry and render this watcher inert.
    ///
    /// Subsequent notifications and `update` calls are no-ops. Idempotent.
    pub fn teardown(&self) {
        if self.inner.torn_down.replace(true) {
            return;
        }
        let deps = std::mem::take(&mut *self.inner.deps.borrow_mut());
        debug!(
            watcher_id = self.inner.id.raw(),
            deps = deps.len(),
            "watcher torn down"
        );
        for dep in deps.values() {
            dep.remove_sub(self.inner.id);
        }
    }

    /// Whether [`teardown`](Watcher::teardown) has run.
    #[must_use]
    pub fn is_torn_down(&self) -> bool {
        self.inner.torn_down.get()
    }

    /// The cached value from the last evaluation.
    #[must_use]
    pub fn value(&self) -> Value {
        self.inner.value.borrow().clone()
    }

    /// Number of registries in the committed dependency set.
    #[must_use]
    pub fn dep_count(&self) -> usize {
        self.inner.deps.borrow().len()
    }

    pub(crate) fn downgrade(&self) -> Weak<WatcherInner> {
        Rc::downgrade(&self.inner)
    }
}

impl std::fmt::Debug for Watcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watcher")
            .field("id", &self.inner.id)
            .field("value", &*self.inner.value.borrow())
            .field("deps", &self.inner.deps.borrow().len())
            .field("torn_down", &self.inner.torn_down.get())
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

    /// Collects `(new, old)` callback invocations for assertions.
    fn recording_callback() -> (
        Rc<RefCell<Vec<(Value, Value)>>>,
        impl Fn(&Value, &Value) + 'static,
    ) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&log);
        (log, move |new: &Value, old: &Value| {
            sink.borrow_mut().push((new.clone(), old.clone()));
        })
    }

    #[test]
    fn seed_does_not_fire_callback() {
        let root = observe(Value::object([("a", 1)])).unwrap();
        let (log, cb) = recording_callback();
        let watcher = Watcher::with_path(&root, "a", cb).unwrap();
        assert!(log.borrow().is_empty());
        assert_eq!(watcher.value(), Value::Int(1));
    }

    #[test]
    fn malformed_path_is_an_error() {
        let root = observe(Value::object([("a", 1)])).unwrap();
        let result = Watcher::with_path(&root, "a[0]", |_, _| {});
        assert!(matches!(
            result,
            Err(PathError::InvalidCharacter { ch: '[', .. })
        ));
    }

    #[test]
    fn single_write_fires_once_with_new_and_old() {
        let root = observe(Value::object([("a", 1)])).unwrap();
        let (log, cb) = recording_callback();
        let _watcher = Watcher::with_path(&root, "a", cb).unwrap();

        root.set("a", 2);
        assert_eq!(*log.borrow(), vec![(Value::Int(2), Value::Int(1))]);

        // Identity-equal write: silent.
        root.set("a", 2);
        assert_eq!(log.borrow().len(), 1);
    }

    #[test]
    fn nested_path_registers_every_ancestor() {
        let root = observe(Value::object([(
            "a",
            Value::object([("b", Value::object([("c", 1)]))]),
        )]))
        .unwrap();
        let (_log, cb) = recording_callback();
        let watcher = Watcher::with_path(&root, "a.b.c", cb).unwrap();

        // a, a.b, and a.b.c each contribute one registry.
        assert_eq!(watcher.dep_count(), 3);
        assert_eq!(root.cell("a").unwrap().dep().sub_count(), 1);
    }

    #[test]
    fn repeated_reads_register_once() {
        let root = observe(Value::object([("a", 1)])).unwrap();
        let (_log, cb) = recording_callback();
        let watcher = Watcher::with_fn(
            &root,
            |scope| {
                let first = scope.get("a");
                let _again = scope.get("a");
                let _thrice = scope.get("a");
                first
            },
            cb,
        );
        assert_eq!(watcher.dep_count(), 1);
        assert_eq!(root.cell("a").unwrap().dep().sub_count(), 1);
    }

    #[test]
    fn subtree_replacement_retriggers_path_watchers() {
        let root = observe(Value::object([("a", Value::object([("b", 1)]))])).unwrap();
        let (log, cb) = recording_callback();
        let _watcher = Watcher::with_path(&root, "a.b", cb).unwrap();

        root.child("a").unwrap().set("b", 2);
        assert_eq!(*log.borrow(), vec![(Value::Int(2), Value::Int(1))]);

        root.set("a", Value::object([("b", 9)]));
        assert_eq!(log.borrow().len(), 2);
        assert_eq!(log.borrow()[1], (Value::Int(9), Value::Int(2)));

        // Rewired to the fresh subtree: nested writes keep flowing.
        root.child("a").unwrap().set("b", 10);
        assert_eq!(log.borrow().len(), 3);
        assert_eq!(log.borrow()[2], (Value::Int(10), Value::Int(9)));
    }

    #[test]
    fn replacement_with_missing_leaf_resolves_null() {
        let root = observe(Value::object([("a", Value::object([("b", 1)]))])).unwrap();
        let (log, cb) = recording_callback();
        let _watcher = Watcher::with_path(&root, "a.b", cb).unwrap();

        root.set("a", Value::object([("other", 1)]));
        assert_eq!(*log.borrow(), vec![(Value::Null, Value::Int(1))]);
    }

    #[test]
    fn two_watchers_each_fire_once_per_write() {
        let root = observe(Value::object([("a", 1)])).unwrap();
        let (log1, cb1) = recording_callback();
        let (log2, cb2) = recording_callback();
        let _w1 = Watcher::with_path(&root, "a", cb1).unwrap();
        let _w2 = Watcher::with_path(&root, "a", cb2).unwrap();

        root.set("a", 2);
        assert_eq!(log1.borrow().len(), 1);
        assert_eq!(log2.borrow().len(), 1);
        assert_eq!(root.cell("a").unwrap().dep().sub_count(), 2);
    }

    #[test]
    fn conditional_resolver_drops_unread_dependencies() {
        let root = observe(Value::object([
            ("use_a", Value::from(true)),
            ("a", Value::from(10)),
            ("b", Value::from(20)),
        ]))
        .unwrap();
        let (log, cb) = recording_callback();
        let watcher = Watcher::with_fn(
            &root,
            |scope| {
                if scope.get("use_a").is_truthy() {
                    scope.get("a")
                } else {
                    scope.get("b")
                }
            },
            cb,
        );
        assert_eq!(watcher.dep_count(), 2); // use_a, a
        assert_eq!(root.cell("b").unwrap().dep().sub_count(), 0);

        root.set("use_a", false);
        assert_eq!(log.borrow().len(), 1);
        assert_eq!(log.borrow()[0], (Value::Int(20), Value::Int(10)));
        assert_eq!(watcher.dep_count(), 2); // use_a, b
        assert_eq!(root.cell("a").unwrap().dep().sub_count(), 0);

        // The dropped branch is really disconnected.
        root.set("a", 11);
        assert_eq!(log.borrow().len(), 1);
    }

    #[test]
    fn get_reports_fresh_value_without_touching_cache() {
        let root = observe(Value::object([("a", 1)])).unwrap();
        let watcher = Watcher::with_path(&root, "a", |_, _| {}).unwrap();

        assert_eq!(watcher.get(), Value::Int(1));
        assert_eq!(watcher.value(), Value::Int(1));
        assert_eq!(watcher.dep_count(), 1);
    }

    #[test]
    fn update_refreshes_cache_and_fires() {
        let root = observe(Value::object([("a", 1)])).unwrap();
        let (log, cb) = recording_callback();
        let watcher = Watcher::with_path(&root, "a", cb).unwrap();

        root.set("a", 5);
        assert_eq!(watcher.value(), Value::Int(5));
        assert_eq!(log.borrow().len(), 1);

        // A forced update with no underlying change is unobservable.
        watcher.update();
        assert_eq!(log.borrow().len(), 1);
    }

    #[test]
    fn teardown_detaches_from_all_registries() {
        let root = observe(Value::object([("a", Value::object([("b", 1)]))])).unwrap();
        let (log, cb) = recording_callback();
        let watcher = Watcher::with_path(&root, "a.b", cb).unwrap();
        assert_eq!(root.cell("a").unwrap().dep().sub_count(), 1);

        watcher.teardown();
        assert!(watcher.is_torn_down());
        assert_eq!(watcher.dep_count(), 0);
        assert_eq!(root.cell("a").unwrap().dep().sub_count(), 0);

        root.child("a").unwrap().set("b", 2);
        assert!(log.borrow().is_empty());

        // Idempotent.
        watcher.teardown();
    }

    #[test]
    fn manual_add_dep_is_idempotent() {
        let root = observe(Value::object([("a", 1), ("extra", 2)])).unwrap();
        let watcher = Watcher::with_path(&root, "a", |_, _| {}).unwrap();
        let extra = root.cell("extra").unwrap().dep().clone();

        watcher.add_dep(&extra);
        watcher.add_dep(&extra);
        assert_eq!(watcher.dep_count(), 2);
        assert_eq!(extra.sub_count(), 1);
    }

    #[test]
    fn function_resolver_composes_values() {
        let root = observe(Value::object([("x", 2), ("y", 3)])).unwrap();
        let (log, cb) = recording_callback();
        let watcher = Watcher::with_fn(
            &root,
            |scope| {
                let x = scope.get("x").as_i64().unwrap_or(0);
                let y = scope.get("y").as_i64().unwrap_or(0);
                Value::from(x * y)
            },
            cb,
        );
        assert_eq!(watcher.value(), Value::Int(6));
        assert_eq!(watcher.dep_count(), 2);

        root.set("y", 5);
        assert_eq!(*log.borrow(), vec![(Value::Int(10), Value::Int(6))]);
    }

    #[test]
    fn callback_writes_cascade_synchronously() {
        let root = observe(Value::object([("source", 1), ("mirror", 0)])).unwrap();

        let mirror_root = root.clone();
        let _mirror = Watcher::with_path(&root, "source", move |new, _| {
            mirror_root.set("mirror", new.clone());
        })
        .unwrap();

        let (log, cb) = recording_callback();
        let _downstream = Watcher::with_path(&root, "mirror", cb).unwrap();

        root.set("source", 42);
        // The cascade completed before set() returned.
        assert_eq!(*log.borrow(), vec![(Value::Int(42), Value::Int(0))]);
        assert_eq!(root.get("mirror"), Value::Int(42));
    }

    #[test]
    fn evaluations_counter_increments() {
        let before = evaluations_total();
        let root = observe(Value::object([("a", 1)])).unwrap();
        let _watcher = Watcher::with_path(&root, "a", |_, _| {}).unwrap();
        assert!(evaluations_total() > before);
    }
}
