//! Function references usable as expression heads.
//!
//! A `Predicate` is the evaluable head of an expression. It may carry a
//! compute body, a cascading setter, or both:
//!
//! - The compute body runs when the expression is demanded and not cached.
//!   It receives the evaluator so it can `spy` other expressions and issue
//!   derivatives.
//!
//! - The setter runs when an expression with this head is *written*. It
//!   receives the evaluator, the written expression, and the written value,
//!   and may perform further writes; those writes join the originating
//!   write's affected set.
//!
//! Predicates compare by pointer identity, like function references. Two
//! calls to `Predicate::new` with identical closures produce distinct
//! predicates; hold one instance and reuse it wherever the same head is
//! meant.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use futures::future::LocalBoxFuture;

use super::expression::Expr;
use super::value::Value;
use crate::error::EvalError;
use crate::eval::Evaluator;

/// Compute body signature: evaluator handle plus the argument terms.
pub type PredicateFn = dyn Fn(&mut Evaluator, &[Value]) -> Result<Value, EvalError>;

/// Cascading setter signature: evaluator, written expression, written value.
pub type SetterFn = dyn Fn(&mut Evaluator, &Expr, &Value) -> Result<(), EvalError>;

struct PredicateInner {
    name: &'static str,
    run: Option<Box<PredicateFn>>,
    setter: Option<Box<SetterFn>>,
}

/// A function reference heading evaluable expressions.
#[derive(Clone)]
pub struct Predicate {
    inner: Arc<PredicateInner>,
}

impl Predicate {
    /// A plain computable predicate.
    pub fn new<F>(name: &'static str, run: F) -> Self
    where
        F: Fn(&mut Evaluator, &[Value]) -> Result<Value, EvalError> + 'static,
    {
        Self {
            inner: Arc::new(PredicateInner {
                name,
                run: Some(Box::new(run)),
                setter: None,
            }),
        }
    }

    /// A cascading predicate with no compute body.
    ///
    /// Reads of expressions with this head behave like data reads; writes
    /// trigger the setter.
    pub fn cascading<S>(name: &'static str, setter: S) -> Self
    where
        S: Fn(&mut Evaluator, &Expr, &Value) -> Result<(), EvalError> + 'static,
    {
        Self {
            inner: Arc::new(PredicateInner {
                name,
                run: None,
                setter: Some(Box::new(setter)),
            }),
        }
    }

    /// A cascading predicate that is also computable.
    pub fn cascading_with<F, S>(name: &'static str, run: F, setter: S) -> Self
    where
        F: Fn(&mut Evaluator, &[Value]) -> Result<Value, EvalError> + 'static,
        S: Fn(&mut Evaluator, &Expr, &Value) -> Result<(), EvalError> + 'static,
    {
        Self {
            inner: Arc::new(PredicateInner {
                name,
                run: Some(Box::new(run)),
                setter: Some(Box::new(setter)),
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        self.inner.name
    }

    pub fn is_cascading(&self) -> bool {
        self.inner.setter.is_some()
    }

    pub(crate) fn run(&self) -> Option<&PredicateFn> {
        self.inner.run.as_deref()
    }

    pub(crate) fn setter(&self) -> Option<&SetterFn> {
        self.inner.setter.as_deref()
    }
}

impl PartialEq for Predicate {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Predicate {}

impl Hash for Predicate {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (Arc::as_ptr(&self.inner) as usize).hash(state);
    }
}

impl fmt::Debug for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fn:{}", self.inner.name)
    }
}

/// The future an asynchronous effect function produces.
pub type AsyncValueFuture = LocalBoxFuture<'static, Value>;

struct AsyncFnInner {
    name: &'static str,
    run: Box<dyn Fn(&[Value]) -> AsyncValueFuture>,
}

/// An asynchronous effect function, usable as a term of bridge expressions.
///
/// The reactor invokes it at most once per distinct argument list; the
/// produced future is parked under the `(promise, f, args…)` key.
#[derive(Clone)]
pub struct AsyncFn {
    inner: Arc<AsyncFnInner>,
}

impl AsyncFn {
    pub fn new<F>(name: &'static str, run: F) -> Self
    where
        F: Fn(&[Value]) -> AsyncValueFuture + 'static,
    {
        Self {
            inner: Arc::new(AsyncFnInner {
                name,
                run: Box::new(run),
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        self.inner.name
    }

    pub(crate) fn call(&self, args: &[Value]) -> AsyncValueFuture {
        (self.inner.run)(args)
    }
}

impl PartialEq for AsyncFn {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for AsyncFn {}

impl Hash for AsyncFn {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (Arc::as_ptr(&self.inner) as usize).hash(state);
    }
}

impl fmt::Debug for AsyncFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "async:{}", self.inner.name)
    }
}
