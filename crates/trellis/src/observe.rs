#![forbid(unsafe_code)]

//! Reactive cell trees — the property interceptor.
//!
//! [`observe`] takes a composite [`Value`] and eagerly builds a tree of
//! [`ReactiveCell`]s: one cell (and one dependency registry) per property,
//! recursing into map-valued properties. All tracked access goes through
//! the cells:
//!
//! - **reads** consult the active evaluation context and register the
//!   cell's registry with the evaluating watcher (a no-op outside any
//!   evaluation), then return the stored value;
//! - **writes** short-circuit when the new value is identical to the
//!   current one; otherwise they store the value, rebuild the nested
//!   subtree when the new value is composite, and notify the registry.
//!
//! A cell's registry lives as long as the cell: replacing the value keeps
//! the registry, so watchers re-attach to the *same* registry on their next
//! evaluation. Replacing a composite value discards the old nested subtree
//! wholesale — its cells (and registries) are rebuilt fresh, and any stale
//! registrations linger only until the affected watchers re-evaluate.
//!
//! # Invariants
//!
//! 1. Exactly one registry per observed property, for the property's
//!    lifetime.
//! 2. Reading a property outside an evaluation returns the current value
//!    and registers nothing.
//! 3. An identity-equal write performs no notification and no rebuild.

use std::cell::RefCell;
use std::rc::Rc;

use ahash::AHashMap;
use tracing::{debug, trace};

use crate::dep::Dep;
use crate::value::Value;

/// Wrap a composite value in a reactive cell tree.
///
/// Returns `None` for non-composite input — `Null`, primitives, and lists
/// are not wrappable, and that is a normal outcome rather than an error.
#[must_use]
pub fn observe(value: Value) -> Option<Observed> {
    match value {
        Value::Map(map) => {
            let observed = Observed::empty();
            {
                let mut cells = observed.inner.cells.borrow_mut();
                for (key, val) in map.iter() {
                    cells.insert(key.clone(), ReactiveCell::new(key, val.clone()));
                }
            }
            debug!(properties = map.len(), "wrapped composite value");
            Some(observed)
        }
        _ => None,
    }
}

struct CellInner {
    key: Rc<str>,
    dep: Dep,
    slot: RefCell<Value>,
    child: RefCell<Option<Observed>>,
}

/// One observed property: a value slot plus its dependency registry.
///
/// Cloning a `ReactiveCell` creates a new handle to the **same** cell.
/// This is the typed get/set surface that replaces dynamically installed
/// accessors: reading or writing through the cell is the only access path
/// that participates in dependency tracking.
#[derive(Clone)]
pub struct ReactiveCell {
    inner: Rc<CellInner>,
}

impl ReactiveCell {
    fn new(key: &str, value: Value) -> Self {
        let child = observe(value.clone());
        Self {
            inner: Rc::new(CellInner {
                key: Rc::from(key),
                dep: Dep::new(key),
                slot: RefCell::new(value),
                child: RefCell::new(child),
            }),
        }
    }

    /// The property key this cell holds.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.inner.key
    }

    /// The cell's dependency registry.
    #[must_use]
    pub fn dep(&self) -> &Dep {
        &self.inner.dep
    }

    /// Tracked read: registers with the evaluating watcher (if any), then
    /// returns the stored value.
    #[must_use]
    pub fn get(&self) -> Value {
        self.inner.dep.depend();
        self.inner.slot.borrow().clone()
    }

    /// Tracked write.
    ///
    /// Identity-equal values are ignored entirely. Otherwise the slot is
    /// updated, the nested subtree is rebuilt (composite value) or cleared
    /// (leaf value), and the registry is notified — synchronously, before
    /// this call returns.
    pub fn set(&self, value: impl Into<Value>) {
        let value = value.into();
        {
            let current = self.inner.slot.borrow();
            if Value::same_identity(&current, &value) {
                trace!(key = %self.inner.key, "write short-circuited (identical value)");
                return;
            }
        }
        let child = observe(value.clone());
        *self.inner.slot.borrow_mut() = value;
        *self.inner.child.borrow_mut() = child;
        self.inner.dep.notify();
    }

    /// The nested observed subtree, when the stored value is composite.
    #[must_use]
    pub fn child(&self) -> Option<Observed> {
        self.inner.child.borrow().clone()
    }
}

impl std::fmt::Debug for ReactiveCell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReactiveCell")
            .field("key", &self.inner.key)
            .field("value", &*self.inner.slot.borrow())
            .field("dep", &self.inner.dep.id())
            .finish()
    }
}

struct ObservedInner {
    cells: RefCell<AHashMap<String, ReactiveCell>>,
}

/// A wrapped composite value: a table of reactive cells, one per property.
///
/// Cloning an `Observed` creates a new handle to the **same** tree.
#[derive(Clone)]
pub struct Observed {
    inner: Rc<ObservedInner>,
}

impl Observed {
    fn empty() -> Self {
        Self {
            inner: Rc::new(ObservedInner {
                cells: RefCell::new(AHashMap::new()),
            }),
        }
    }

    /// Look up the cell for `key`.
    ///
    /// The lookup itself is untracked; tracking happens when the returned
    /// cell is read or written.
    #[must_use]
    pub fn cell(&self, key: &str) -> Option<ReactiveCell> {
        self.inner.cells.borrow().get(key).cloned()
    }

    /// Tracked read of `key`. Missing properties resolve to [`Value::Null`]
    /// and register nothing.
    #[must_use]
    pub fn get(&self, key: &str) -> Value {
        match self.cell(key) {
            Some(cell) => cell.get(),
            None => Value::Null,
        }
    }

    /// Tracked descent into a composite property.
    ///
    /// Registers the property's registry first, then returns the nested
    /// tree — or `None` when the property is missing (nothing to register)
    /// or holds a leaf value (registered, then short-circuited). This
    /// ordering is what makes every *ancestor* segment of a path a
    /// dependency even when the walk stops early.
    #[must_use]
    pub fn child(&self, key: &str) -> Option<Observed> {
        let cell = self.cell(key)?;
        cell.dep().depend();
        cell.child()
    }

    /// Tracked write of `key`.
    ///
    /// Writes to a key that existed at wrap time go through the cell (with
    /// identity short-circuit and notification). Writing a key absent at
    /// wrap time inserts a fresh, quiet cell: no watcher can have read the
    /// key, so there is nobody to notify; subsequent evaluations that read
    /// it track it normally.
    pub fn set(&self, key: &str, value: impl Into<Value>) {
        if let Some(cell) = self.cell(key) {
            cell.set(value);
            return;
        }
        trace!(key, "inserting cell for previously unobserved key");
        let cell = ReactiveCell::new(key, value.into());
        self.inner.cells.borrow_mut().insert(key.to_owned(), cell);
    }

    /// Number of observed properties.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.cells.borrow().len()
    }

    /// Whether the tree has no properties.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.cells.borrow().is_empty()
    }

    /// Untracked membership test.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.inner.cells.borrow().contains_key(key)
    }

    /// Property keys, sorted. Untracked.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.inner.cells.borrow().keys().cloned().collect();
        keys.sort_unstable();
        keys
    }

    /// Materialize the live tree as a plain [`Value`]. Untracked —
    /// diagnostic reads must not wire dependencies.
    #[must_use]
    pub fn to_value(&self) -> Value {
        let cells = self.inner.cells.borrow();
        let mut map = std::collections::BTreeMap::new();
        for (key, cell) in cells.iter() {
            let value = match cell.child() {
                Some(child) => child.to_value(),
                None => cell.inner.slot.borrow().clone(),
            };
            map.insert(key.clone(), value);
        }
        Value::Map(Rc::new(map))
    }
}

impl std::fmt::Debug for Observed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observed")
            .field("keys", &self.keys())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
