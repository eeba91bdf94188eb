#![no_main]

//! Structured fuzzing of the reactive graph: random sequences of writes,
//! watcher creation, and teardown against a two-level tree must never
//! panic, and per-registry accounting must stay consistent.

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use trellis::{Value, Watcher, observe};

#[derive(Arbitrary, Debug)]
enum Op {
    SetLeaf { key: u8, value: i16 },
    SetNested { key: u8, value: i16 },
    ReplaceSubtree { key: u8, inner: i16 },
    Watch { path_key: u8, nested: bool },
    Teardown { index: u8 },
    DropWatcher { index: u8 },
}

const KEYS: [&str; 3] = ["a", "b", "c"];

fuzz_target!(|ops: Vec<Op>| {
    let root = observe(Value::object([
        ("a", Value::object([("x", 0)])),
        ("b", Value::object([("x", 0)])),
        ("c", Value::from(0)),
    ]))
    .unwrap();

    let mut watchers: Vec<Watcher> = Vec::new();

    for op in ops {
        match op {
            Op::SetLeaf { key, value } => {
                root.set(KEYS[key as usize % KEYS.len()], i64::from(value));
            }
            Op::SetNested { key, value } => {
                if let Some(child) = root.child(KEYS[key as usize % KEYS.len()]) {
                    child.set("x", i64::from(value));
                }
            }
            Op::ReplaceSubtree { key, inner } => {
                root.set(
                    KEYS[key as usize % KEYS.len()],
                    Value::object([("x", i64::from(inner))]),
                );
            }
            Op::Watch { path_key, nested } => {
                if watchers.len() < 32 {
                    let key = KEYS[path_key as usize % KEYS.len()];
                    let path = if nested {
                        format!("{key}.x")
                    } else {
                        key.to_string()
                    };
                    watchers.push(Watcher::with_path(&root, &path, |_, _| {}).unwrap());
                }
            }
            Op::Teardown { index } => {
                if !watchers.is_empty() {
                    watchers[index as usize % watchers.len()].teardown();
                }
            }
            Op::DropWatcher { index } => {
                if !watchers.is_empty() {
                    let i = index as usize % watchers.len();
                    watchers.swap_remove(i);
                }
            }
        }
    }

    // Live non-torn-down watchers are the only possible subscribers.
    let live = watchers.iter().filter(|w| !w.is_torn_down()).count();
    for key in KEYS {
        assert!(root.cell(key).unwrap().dep().sub_count() <= live);
    }
});
