#![forbid(unsafe_code)]

//! Dynamic value model for observed trees.
//!
//! [`Value`] is the currency of the engine: everything stored in a reactive
//! cell, returned from a resolver, or handed to a change callback is a
//! `Value`. Payload-carrying variants hold `Rc` data, so cloning is cheap
//! and a clone is a *handle* to the same list or map, not a deep copy.
//!
//! # Identity
//!
//! Change detection compares by [`Value::same_identity`], which follows
//! strict-equality semantics rather than structural equality:
//!
//! - primitives compare by value (`Int` and `Float` compare numerically, so
//!   `1` and `1.0` are identical; `NaN` is never identical to anything,
//!   itself included);
//! - strings compare by value;
//! - lists and maps compare by pointer — two structurally equal maps built
//!   independently are *not* identical, while two clones of one map are.
//!
//! Structural equality is still available through `PartialEq` for tests and
//! snapshot comparison.
//!
//! # Composites
//!
//! Only `Map` is composite: wrapping recurses into map-valued properties
//! and nothing else. Lists are opaque leaves — there is no index-level
//! interception.

use std::collections::BTreeMap;
use std::rc::Rc;

/// A dynamically typed value stored in an observed tree.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    /// Absent data. Missing properties and short-circuited path walks
    /// resolve to `Null`.
    #[default]
    Null,
    /// Boolean.
    Bool(bool),
    /// Integer number.
    Int(i64),
    /// Floating-point number.
    Float(f64),
    /// Immutable string.
    Str(Rc<str>),
    /// Opaque list. Never recursed into by the interceptor.
    List(Rc<Vec<Value>>),
    /// Composite map. The only variant eligible for wrapping.
    Map(Rc<BTreeMap<String, Value>>),
}

impl Value {
    /// Build a `Map` value from key/value entries.
    #[must_use]
    pub fn object<K, V, I>(entries: I) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        Value::Map(Rc::new(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        ))
    }

    /// Build a `List` value from elements.
    #[must_use]
    pub fn list<V, I>(elements: I) -> Self
    where
        V: Into<Value>,
        I: IntoIterator<Item = V>,
    {
        Value::List(Rc::new(elements.into_iter().map(Into::into).collect()))
    }

    /// Whether this value is eligible for wrapping (a `Map`).
    #[must_use]
    pub fn is_composite(&self) -> bool {
        matches!(self, Value::Map(_))
    }

    /// Whether this value is `Null`.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Truthiness: `Null`, `false`, `0`, `0.0`, `NaN`, and `""` are falsy;
    /// everything else (lists and maps included, even empty ones) is truthy.
    #[must_use]
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(n) => *n != 0,
            Value::Float(n) => *n != 0.0 && !n.is_nan(),
            Value::Str(s) => !s.is_empty(),
            Value::List(_) | Value::Map(_) => true,
        }
    }

    /// Strict-identity comparison used for change detection.
    ///
    /// Primitives compare by value (numbers numerically across `Int` and
    /// `Float`, `NaN` identical to nothing); lists and maps compare by
    /// pointer.
    #[must_use]
    pub fn same_identity(a: &Value, b: &Value) -> bool {
        match (a, b) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(x), Value::Bool(y)) => x == y,
            (Value::Int(x), Value::Int(y)) => x == y,
            (Value::Float(x), Value::Float(y)) => x == y,
            (Value::Int(x), Value::Float(y)) | (Value::Float(y), Value::Int(x)) => {
                (*x as f64) == *y
            }
            (Value::Str(x), Value::Str(y)) => x == y,
            (Value::List(x), Value::List(y)) => Rc::ptr_eq(x, y),
            (Value::Map(x), Value::Map(y)) => Rc::ptr_eq(x, y),
            _ => false,
        }
    }

    /// Borrow the map entries if this is a `Map`.
    #[must_use]
    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Borrow the string payload if this is a `Str`.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric view: `Int` widened to `f64`, `Float` as-is.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(n) => Some(*n as f64),
            Value::Float(n) => Some(*n),
            _ => None,
        }
    }

    /// Integer payload if this is an `Int`.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(Rc::from(v))
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(Rc::from(v.as_str()))
    }
}

impl From<Rc<str>> for Value {
    fn from(v: Rc<str>) -> Self {
        Value::Str(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::List(Rc::new(v))
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(v: BTreeMap<String, Value>) -> Self {
        Value::Map(Rc::new(v))
    }
}

#[cfg(feature = "json")]
impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => Value::Str(Rc::from(s.as_str())),
            serde_json::Value::Array(items) => {
                Value::List(Rc::new(items.into_iter().map(Value::from).collect()))
            }
            serde_json::Value::Object(entries) => Value::Map(Rc::new(
                entries.into_iter().map(|(k, v)| (k, Value::from(v))).collect(),
            )),
        }
    }
}

#[cfg(feature = "json")]
impl From<&Value> for serde_json::Value {
    fn from(v: &Value) -> Self {
        match v {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(n) => serde_json::Value::from(*n),
            // JSON has no NaN/infinity; they degrade to null.
            Value::Float(n) => serde_json::Number::from_f64(*n)
                .map_or(serde_json::Value::Null, serde_json::Value::Number),
            Value::Str(s) => serde_json::Value::String(s.to_string()),
            Value::List(items) => {
                serde_json::Value::Array(items.iter().map(serde_json::Value::from).collect())
            }
            Value::Map(entries) => serde_json::Value::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), serde_json::Value::from(v)))
                    .collect(),
            ),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
