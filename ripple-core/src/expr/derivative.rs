//! Derivative ids.
//!
//! A `DerivativeId` tags expressions whose existence is owned by another
//! expression's computation. The id captures the creating expression and a
//! caller-chosen key; expressions keyed by it are recorded as dependents of
//! the creator, so invalidating the creator invalidates every derivative it
//! published. When the creator recomputes, it issues fresh writes and the
//! previous generation's entries stay gone.

use std::fmt;
use std::sync::Arc;

use super::expression::Expr;
use super::value::Value;

#[derive(PartialEq, Eq, Hash)]
struct DerivativeIdInner {
    creating: Expr,
    key: Value,
}

/// An immutable `(creating expression, unique key)` pair.
///
/// Equality and hash are structural over both fields: the same computation
/// asking for the same key obtains an equal id, and ids from different
/// creating expressions never collide.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct DerivativeId {
    inner: Arc<DerivativeIdInner>,
}

impl DerivativeId {
    pub(crate) fn new(creating: Expr, key: Value) -> Self {
        Self {
            inner: Arc::new(DerivativeIdInner { creating, key }),
        }
    }

    /// The expression whose computation created this id.
    pub fn creating_expr(&self) -> &Expr {
        &self.inner.creating
    }

    /// The caller-chosen key.
    pub fn key(&self) -> &Value {
        &self.inner.key
    }
}

impl fmt::Debug for DerivativeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "deriv({:?} of {:?})",
            self.inner.key, self.inner.creating
        )
    }
}
