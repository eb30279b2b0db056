//! The async bridge.
//!
//! Thin tagged expressions lift external asynchronous computations into the
//! expression world. An async call keyed by `(f, args…)` is described by
//! three data expressions:
//!
//! - `(status, f, args…)` — absent, `"executing"`, or `"complete"`;
//! - `(result, f, args…)` — the resolved value once complete;
//! - `(promise, f, args…)` — the key of the parked future (the future
//!   itself lives in the reactor's promise table; futures are not values).
//!
//! On top of those sit ordinary, cacheable predicates: status and result
//! views, the readiness check, and the spying accessor that raises the
//! [`EvalError::AsyncCallIncomplete`] sentinel until the call completes.
//! Because the predicates `spy` the tagged expressions, the writes the
//! reactor performs when a call finishes invalidate exactly the
//! computations that consulted that call.

use std::sync::OnceLock;

use crate::error::EvalError;
use crate::expr::{AsyncFn, Expr, Predicate, Tag, Value};

/// Lifecycle of an asynchronous call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsyncCallStatus {
    NotStarted,
    Executing,
    Complete,
}

impl AsyncCallStatus {
    /// The value form. Status cells only ever hold the executing and
    /// complete forms; an absent cell reads back as `NotStarted`.
    pub fn to_value(self) -> Value {
        match self {
            AsyncCallStatus::NotStarted => Value::from("not-started"),
            AsyncCallStatus::Executing => Value::from("executing"),
            AsyncCallStatus::Complete => Value::from("complete"),
        }
    }

    pub fn from_value(v: &Value) -> Self {
        match v.as_str() {
            Some("executing") => AsyncCallStatus::Executing,
            Some("complete") => AsyncCallStatus::Complete,
            _ => AsyncCallStatus::NotStarted,
        }
    }
}

/// Head tag of `(status, f, args…)` expressions.
pub fn status_tag() -> Tag {
    static TAG: OnceLock<Tag> = OnceLock::new();
    *TAG.get_or_init(|| Tag::new("async-status"))
}

/// Head tag of `(result, f, args…)` expressions.
pub fn result_tag() -> Tag {
    static TAG: OnceLock<Tag> = OnceLock::new();
    *TAG.get_or_init(|| Tag::new("async-result"))
}

/// Head tag of `(promise, f, args…)` expressions.
pub fn promise_tag() -> Tag {
    static TAG: OnceLock<Tag> = OnceLock::new();
    *TAG.get_or_init(|| Tag::new("async-promise"))
}

/// The call expression `(f, args…)`.
pub fn call_expr(f: &AsyncFn, args: &[Value]) -> Expr {
    let mut terms = vec![Value::AsyncFunc(f.clone())];
    terms.extend(args.iter().cloned());
    Expr::new(terms)
}

fn tagged(tag: Tag, call: &[Value]) -> Expr {
    let mut terms = vec![Value::Tag(tag)];
    terms.extend(call.iter().cloned());
    Expr::new(terms)
}

/// `(status, f, args…)`.
pub fn status_expr(f: &AsyncFn, args: &[Value]) -> Expr {
    tagged(status_tag(), &call_terms(f, args))
}

/// `(result, f, args…)`.
pub fn result_expr(f: &AsyncFn, args: &[Value]) -> Expr {
    tagged(result_tag(), &call_terms(f, args))
}

/// `(promise, f, args…)`.
pub fn promise_expr(f: &AsyncFn, args: &[Value]) -> Expr {
    tagged(promise_tag(), &call_terms(f, args))
}

fn call_terms(f: &AsyncFn, args: &[Value]) -> Vec<Value> {
    let mut terms = vec![Value::AsyncFunc(f.clone())];
    terms.extend(args.iter().cloned());
    terms
}

/// Split a call expression back into its function and arguments.
pub fn parse_call(call: &Expr) -> Option<(AsyncFn, Vec<Value>)> {
    let f = call.head()?.as_async_fn()?.clone();
    Some((f, call.args()))
}

/// The readiness expression `[result-is-ready, …e]` for an inner
/// expression `e` (the inner terms are spliced, not nested).
pub fn ready_expr(inner: &Expr) -> Expr {
    inner.with_head(result_is_ready())
}

// Bridge predicates are per-thread singletons so that every call site
// builds equal expression keys; the engine itself is single-threaded.
thread_local! {
    static ASYNC_CALL_STATUS: Predicate = Predicate::new("async-call-status", |ev, args| {
        let status = ev.spy(&tagged(status_tag(), args))?;
        Ok(AsyncCallStatus::from_value(&status).to_value())
    });

    static ASYNC_CALL_RESULT: Predicate = Predicate::new("async-call-result", |ev, args| {
        ev.spy(&tagged(result_tag(), args))
    });

    static RESULT_IS_READY: Predicate = Predicate::new("result-is-ready", |ev, args| {
        let inner = Expr::new(args.to_vec());
        match ev.spy(&inner) {
            Ok(_) => Ok(Value::Bool(true)),
            Err(EvalError::AsyncCallIncomplete(_)) => Ok(Value::Bool(false)),
            // A cached failure is a settled outcome: the caller can read
            // it (and have it re-raised) right now.
            Err(EvalError::Predicate(_)) => Ok(Value::Bool(true)),
            Err(other) => Err(other),
        }
    });

    static SPY_ASYNC_EFFECT_RESULT: Predicate =
        Predicate::new("spy-async-effect-result", |ev, args| {
            let status = ev.spy(&tagged(status_tag(), args))?;
            if AsyncCallStatus::from_value(&status) == AsyncCallStatus::Complete {
                ev.spy(&tagged(result_tag(), args))
            } else {
                Err(EvalError::AsyncCallIncomplete(Expr::new(args.to_vec())))
            }
        });
}

/// Predicate reporting an async call's [`AsyncCallStatus`] (stored form).
pub fn async_call_status() -> Predicate {
    ASYNC_CALL_STATUS.with(Clone::clone)
}

/// Predicate reporting an async call's resolved value (`Null` if absent).
pub fn async_call_result() -> Predicate {
    ASYNC_CALL_RESULT.with(Clone::clone)
}

/// Predicate deciding whether an expression's synchronous evaluation
/// completes without raising [`EvalError::AsyncCallIncomplete`].
pub fn result_is_ready() -> Predicate {
    RESULT_IS_READY.with(Clone::clone)
}

/// Predicate yielding a completed call's result, raising the incomplete
/// sentinel otherwise.
pub fn spy_async_effect_result() -> Predicate {
    SPY_ASYNC_EFFECT_RESULT.with(Clone::clone)
}
