#![forbid(unsafe_code)]

//! Dot-path expressions.
//!
//! A path expression like `"user.profile.name"` resolves against an
//! observed tree by walking one segment at a time. Each traversed cell is
//! read through its tracking accessor, so **every ancestor segment becomes
//! a dependency**, not just the leaf — replacing `user` wholesale must
//! re-trigger a watcher on `user.profile.name`.
//!
//! Parsing is strict: segments may contain only ASCII letters, digits,
//! `_`, and `$`. Anything else is a structured [`PathError`] surfaced to
//! the caller at construction time, never a silently dead resolver.
//! *Absent data* during resolution is not an error: the walk
//! short-circuits to [`Value::Null`] as soon as an intermediate property is
//! missing or holds a non-composite value.

use thiserror::Error;

use crate::observe::Observed;
use crate::value::Value;

/// Errors produced while parsing a path expression.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    /// The expression was empty (or all whitespace).
    #[error("empty path expression")]
    Empty,

    /// A character outside `[A-Za-z0-9_$.]` appeared.
    #[error("invalid character {ch:?} at offset {offset}")]
    InvalidCharacter { ch: char, offset: usize },

    /// A leading, trailing, or doubled dot produced an empty segment.
    #[error("empty segment at position {index}")]
    EmptySegment { index: usize },
}

/// A parsed dot-path expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathExpr {
    segments: Vec<String>,
}

impl PathExpr {
    /// Parse an expression, trimming surrounding whitespace.
    pub fn parse(input: &str) -> Result<Self, PathError> {
        let expr = input.trim();
        if expr.is_empty() {
            return Err(PathError::Empty);
        }
        for (offset, ch) in expr.char_indices() {
            let valid = ch.is_ascii_alphanumeric() || ch == '_' || ch == '$' || ch == '.';
            if !valid {
                return Err(PathError::InvalidCharacter { ch, offset });
            }
        }
        let segments: Vec<String> = expr.split('.').map(str::to_owned).collect();
        for (index, segment) in segments.iter().enumerate() {
            if segment.is_empty() {
                return Err(PathError::EmptySegment { index });
            }
        }
        Ok(Self { segments })
    }

    /// The ordered path segments.
    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Walk the expression against an observed tree.
    ///
    /// Every cell traversed registers its dependency registry with the
    /// active watcher (when one is evaluating). Returns [`Value::Null`] as
    /// soon as an intermediate segment is missing or non-composite.
    #[must_use]
    pub fn resolve(&self, root: &Observed) -> Value {
        // parse() guarantees at least one segment.
        let (leaf, ancestors) = self
            .segments
            .split_last()
            .expect("parsed path has at least one segment");
        let mut current = root.clone();
        for segment in ancestors {
            match current.child(segment) {
                Some(next) => current = next,
                None => return Value::Null,
            }
        }
        current.get(leaf)
    }
}

impl std::fmt::Display for PathExpr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.segments.join("."))
    }
}

impl std::str::FromStr for PathExpr {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
