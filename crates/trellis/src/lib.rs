#![forbid(unsafe_code)]

//! Self-wiring reactive dependency tracking over observed value trees.
//!
//! Trellis re-runs derived computations when the state they read changes,
//! without any explicit subscription API. A composite value is wrapped once
//! into a tree of reactive cells; watchers evaluate expressions against the
//! tree; and the dependency graph wires itself as a side effect of the
//! reads that happen during evaluation.
//!
//! # Architecture
//!
//! ```text
//!   observe(value) ──► Observed ── one ReactiveCell (+ Dep) per property
//!                          │
//!        Watcher::with_path / with_fn
//!                          │
//!                          ▼
//!   evaluate: enter scope ─► resolver reads cells ─► Dep::depend()
//!                                                        │
//!                          ┌─────────────────────────────┘
//!                          ▼
//!                Watcher::add_dep (idempotent, rebuilt every pass)
//!
//!   cell.set(v) ─► identity check ─► Dep::notify() ─► Watcher::update()
//!                                                     (callback on change)
//! ```
//!
//! **[`value`]** — Dynamic [`Value`] model with strict-identity change
//! detection (primitives by value, composites by pointer).
//!
//! **[`dep`]** — Per-property dependency registries ([`Dep`]): ordered
//! weak subscriber lists, synchronous notification.
//!
//! **[`observe`]** — The property interceptor: [`observe()`] eagerly wraps
//! a composite value into an [`Observed`] tree of [`ReactiveCell`]s, one
//! registry per property.
//!
//! **[`scope`]** — The active evaluation context: a task-scoped slot
//! naming the currently evaluating watcher, held via an RAII guard that is
//! released on every exit path.
//!
//! **[`path`]** — Strictly parsed dot-path expressions ([`PathExpr`]);
//! walking registers every ancestor segment, and absent data resolves to
//! `Null` rather than failing.
//!
//! **[`watcher`]** — Expression subscribers ([`Watcher`]): cached value,
//! per-evaluation dependency rebuild with pruning, explicit teardown.
//!
//! # Example
//!
//! ```
//! use trellis::{Value, Watcher, observe};
//!
//! let root = observe(Value::object([("a", Value::object([("b", 1)]))])).unwrap();
//!
//! let watcher = Watcher::with_path(&root, "a.b", |new, old| {
//!     println!("a.b changed: {old:?} -> {new:?}");
//! })
//! .unwrap();
//! assert_eq!(watcher.value(), Value::Int(1));
//!
//! // Synchronous: the callback fires before set() returns.
//! root.child("a").unwrap().set("b", 2);
//! assert_eq!(watcher.value(), Value::Int(2));
//!
//! // Replacing the whole subtree rewires the watcher.
//! root.set("a", Value::object([("b", 9)]));
//! assert_eq!(watcher.value(), Value::Int(9));
//! ```
//!
//! # Crate features
//!
//! - `json` (disabled by default): lossless conversions between [`Value`]
//!   and `serde_json::Value`.

pub mod dep;
pub mod observe;
pub mod path;
pub mod scope;
pub mod value;
pub mod watcher;

pub use dep::{Dep, DepId};
pub use observe::{Observed, ReactiveCell, observe};
pub use path::{PathError, PathExpr};
pub use value::Value;
pub use watcher::{Watcher, WatcherId};
