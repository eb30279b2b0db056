//! The term sum type.
//!
//! Every position of an expression holds a `Value`: a primitive, an opaque
//! tag, a function reference, a derivative id, or a nested sequence. The
//! whole type is `Eq + Hash` so expressions can key persistent maps;
//! floats go through `OrderedFloat` to make that possible.
//!
//! Equality semantics follow the term kind: primitives and sequences
//! compare structurally, tags by their allocated identity, function
//! references by pointer identity, derivative ids by the structural
//! equality of their fields.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ordered_float::OrderedFloat;

use super::derivative::DerivativeId;
use super::expression::Expr;
use super::predicate::{AsyncFn, Predicate};

/// Counter for allocating unique tag identities.
static TAG_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// An opaque tag value.
///
/// Tags are pure data keys: two tags are equal only if they came from the
/// same `Tag::new` call. The name is carried for diagnostics, not identity.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Tag {
    id: u64,
    name: &'static str,
}

impl Tag {
    /// Allocate a fresh tag with a debug name.
    pub fn new(name: &'static str) -> Self {
        Self {
            id: TAG_ID_COUNTER.fetch_add(1, Ordering::Relaxed),
            name,
        }
    }

    /// The tag's debug name.
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl fmt::Debug for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}:{}", self.name, self.id)
    }
}

/// A single term of an expression, or a computed value.
///
/// The same type serves both roles: expressions are sequences of values,
/// and the values computed by predicates may themselves appear as terms of
/// other expressions.
#[derive(Clone, PartialEq, Eq, Hash)]
pub enum Value {
    /// Absent / undefined-valued outcome.
    Null,
    Bool(bool),
    Int(i64),
    /// Float term; `OrderedFloat` supplies the Eq/Hash the cache needs.
    Float(OrderedFloat<f64>),
    Str(Arc<str>),
    /// A nested sequence value.
    Seq(Expr),
    /// An opaque tag key.
    Tag(Tag),
    /// A predicate function reference; compares by identity.
    Func(Predicate),
    /// An asynchronous effect function reference; compares by identity.
    AsyncFunc(AsyncFn),
    /// A derivative id; compares structurally.
    Derivative(DerivativeId),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(n) => Some(n.0),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_predicate(&self) -> Option<&Predicate> {
        match self {
            Value::Func(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_async_fn(&self) -> Option<&AsyncFn> {
        match self {
            Value::AsyncFunc(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_derivative(&self) -> Option<&DerivativeId> {
        match self {
            Value::Derivative(d) => Some(d),
            _ => None,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(n) => write!(f, "{n}"),
            Value::Float(n) => write!(f, "{}", n.0),
            Value::Str(s) => write!(f, "{s:?}"),
            Value::Seq(e) => e.fmt(f),
            Value::Tag(t) => t.fmt(f),
            Value::Func(p) => p.fmt(f),
            Value::AsyncFunc(a) => a.fmt(f),
            Value::Derivative(d) => d.fmt(f),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Int(n as i64)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Float(OrderedFloat(n))
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(Arc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(Arc::from(s.as_str()))
    }
}

impl From<Tag> for Value {
    fn from(t: Tag) -> Self {
        Value::Tag(t)
    }
}

impl From<Predicate> for Value {
    fn from(p: Predicate) -> Self {
        Value::Func(p)
    }
}

impl From<AsyncFn> for Value {
    fn from(a: AsyncFn) -> Self {
        Value::AsyncFunc(a)
    }
}

impl From<DerivativeId> for Value {
    fn from(d: DerivativeId) -> Self {
        Value::Derivative(d)
    }
}

impl From<Expr> for Value {
    fn from(e: Expr) -> Self {
        Value::Seq(e)
    }
}
