#![forbid(unsafe_code)]

//! Active evaluation context.
//!
//! While a watcher evaluates its resolver, it occupies a single task-scoped
//! slot. Every cell read that happens during the evaluation consults this
//! slot (via [`Dep::depend`](crate::dep::Dep::depend)) to decide whether to
//! record a dependency edge. Outside an evaluation the slot is empty and
//! reads track nothing.
//!
//! The slot is only ever set through [`enter`], which returns an RAII guard.
//! The guard restores the previous occupant on drop, so the slot is cleared
//! on every exit path — early returns and panicking resolvers included.
//! Overlapping top-level evaluations remain unsupported by convention; the
//! engine is single-threaded and fully synchronous.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use tracing::trace;

use crate::watcher::{WatcherId, WatcherInner};

thread_local! {
    static ACTIVE: RefCell<Option<ActiveEntry>> = const { RefCell::new(None) };
}

struct ActiveEntry {
    id: WatcherId,
    watcher: Weak<WatcherInner>,
}

/// RAII guard for one evaluation. Restores the previous slot state on drop.
pub(crate) struct ScopeGuard {
    prev: Option<ActiveEntry>,
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        ACTIVE.with(|slot| *slot.borrow_mut() = self.prev.take());
    }
}

/// Install `watcher` as the active evaluation context until the returned
/// guard is dropped.
pub(crate) fn enter(id: WatcherId, watcher: Weak<WatcherInner>) -> ScopeGuard {
    trace!(watcher_id = id.raw(), "evaluation scope entered");
    let prev = ACTIVE.with(|slot| slot.borrow_mut().replace(ActiveEntry { id, watcher }));
    ScopeGuard { prev }
}

/// Run `f` against the currently evaluating watcher, if there is one and it
/// is still alive. The slot borrow is released before `f` runs, so `f` may
/// freely re-enter scope queries.
pub(crate) fn with_active<R>(f: impl FnOnce(&Rc<WatcherInner>) -> R) -> Option<R> {
    let strong = ACTIVE.with(|slot| slot.borrow().as_ref().and_then(|e| e.watcher.upgrade()))?;
    Some(f(&strong))
}

/// Whether an evaluation is currently in progress.
#[must_use]
pub fn is_evaluating() -> bool {
    ACTIVE.with(|slot| slot.borrow().is_some())
}

/// Identity of the currently evaluating watcher, if any.
#[must_use]
pub fn active_watcher() -> Option<WatcherId> {
    ACTIVE.with(|slot| slot.borrow().as_ref().map(|e| e.id))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
