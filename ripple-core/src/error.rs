//! Error taxonomy for the engine.
//!
//! Two families of failure flow through evaluation:
//!
//! - Engine-misuse errors (`RecursiveComputation`, `DerivativeMisuse`) are
//!   never cached. They surface to the caller and leave no cache entry
//!   behind.
//!
//! - Computation outcomes (`Predicate`, `AsyncCallIncomplete`) are captured
//!   into the result cell exactly like successful values, so a failed
//!   evaluation is idempotent and participates in invalidation. Reading a
//!   thrown cell re-raises the stored error.
//!
//! `AsyncCallIncomplete` doubles as an expected sentinel: the readiness
//! predicate catches it and maps it to `false` instead of propagating.

use std::fmt;

use crate::expr::{Expr, Value};

/// An error raised during evaluation or a write.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum EvalError {
    /// The expression is already on the currently-computing stack.
    ///
    /// Raised before the predicate runs; never cached.
    RecursiveComputation(Expr),

    /// A derivative operation was invoked outside an in-flight computation.
    DerivativeMisuse(&'static str),

    /// The targeted asynchronous call has not completed yet.
    ///
    /// Carries the call expression `(f, args…)` so the reactor can start
    /// the work it names.
    AsyncCallIncomplete(Expr),

    /// A value thrown by a user predicate.
    ///
    /// Captured into the cache and re-raised on every subsequent read until
    /// the entry is invalidated.
    Predicate(Value),
}

impl EvalError {
    /// Build a predicate failure from an arbitrary thrown payload.
    pub fn failure(payload: impl Into<Value>) -> Self {
        EvalError::Predicate(payload.into())
    }

    /// Whether this error may be captured into a result cell.
    ///
    /// This is the single policy point deciding what enters the cache:
    /// outcomes of the computation itself are cached, engine misuse is not.
    pub fn is_cacheable(&self) -> bool {
        matches!(
            self,
            EvalError::Predicate(_) | EvalError::AsyncCallIncomplete(_)
        )
    }
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvalError::RecursiveComputation(expr) => {
                write!(f, "recursive computation of {expr:?}")
            }
            EvalError::DerivativeMisuse(msg) => {
                write!(f, "derivative misuse: {msg}")
            }
            EvalError::AsyncCallIncomplete(call) => {
                write!(f, "async call incomplete: {call:?}")
            }
            EvalError::Predicate(payload) => {
                write!(f, "predicate failure: {payload:?}")
            }
        }
    }
}

impl std::error::Error for EvalError {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::Expr;

    #[test]
    fn cacheability_policy() {
        let e = Expr::new([Value::from("x")]);

        assert!(EvalError::failure("boom").is_cacheable());
        assert!(EvalError::AsyncCallIncomplete(e.clone()).is_cacheable());

        assert!(!EvalError::RecursiveComputation(e).is_cacheable());
        assert!(!EvalError::DerivativeMisuse("outside computation").is_cacheable());
    }

    #[test]
    fn failure_wraps_payload() {
        let err = EvalError::failure(7);
        assert_eq!(err, EvalError::Predicate(Value::Int(7)));
    }
}
