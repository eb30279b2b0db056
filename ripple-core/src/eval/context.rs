//! Evaluation context.
//!
//! The context tracks which expressions are currently being computed. It
//! belongs to a single synchronous evaluation and is threaded through the
//! call stack on the evaluator, not stored on the persistent Store: once
//! the outermost `get` returns, the context is empty again.
//!
//! Three pieces of state live here:
//!
//! - the currently-computing set, the membership test behind recursion
//!   detection;
//! - the deepest-computing expression, which `spy` and the derivative
//!   protocol attribute their bookkeeping to;
//! - the cascade accumulator, installed by the outermost cascading write
//!   and fed by every write nested under it.

use std::collections::HashSet;

use crate::expr::Expr;

/// Per-evaluation re-entrant state.
#[derive(Default)]
pub(crate) struct EvalContext {
    computing: HashSet<Expr>,
    stack: Vec<Expr>,
    deepest: Option<Expr>,
    cascade: Option<HashSet<Expr>>,
}

impl EvalContext {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Whether `e` is already being computed up-stack.
    pub(crate) fn is_computing(&self, e: &Expr) -> bool {
        self.computing.contains(e)
    }

    /// Enter the computation of `e`; returns the previous deepest
    /// expression, to be handed back to [`EvalContext::exit`].
    pub(crate) fn enter(&mut self, e: &Expr) -> Option<Expr> {
        self.computing.insert(e.clone());
        self.stack.push(e.clone());
        self.deepest.replace(e.clone())
    }

    /// Leave the computation of `e`, restoring the saved deepest expression.
    pub(crate) fn exit(&mut self, e: &Expr, saved: Option<Expr>) {
        let popped = self.stack.pop();
        debug_assert_eq!(
            popped.as_ref(),
            Some(e),
            "evaluation stack mismatch: expected {e:?}, got {popped:?}"
        );
        self.computing.remove(e);
        self.deepest = saved;
    }

    /// The innermost expression being evaluated, if any.
    pub(crate) fn deepest(&self) -> Option<&Expr> {
        self.deepest.as_ref()
    }

    /// Point derivative/cascade attribution at `e`; returns the previous
    /// deepest expression for restoration.
    pub(crate) fn redirect(&mut self, e: &Expr) -> Option<Expr> {
        self.deepest.replace(e.clone())
    }

    pub(crate) fn restore(&mut self, saved: Option<Expr>) {
        self.deepest = saved;
    }

    /// Install the cascade accumulator if absent. Returns true when this
    /// call owns it (outermost cascade).
    pub(crate) fn begin_cascade(&mut self) -> bool {
        if self.cascade.is_none() {
            self.cascade = Some(HashSet::new());
            true
        } else {
            false
        }
    }

    /// Take the accumulated consequences; only the owner calls this.
    pub(crate) fn end_cascade(&mut self) -> HashSet<Expr> {
        self.cascade.take().unwrap_or_default()
    }

    /// Contribute a write's affected set to an in-progress cascade, if any.
    pub(crate) fn accumulate(&mut self, affected: &HashSet<Expr>) {
        if let Some(acc) = self.cascade.as_mut() {
            acc.extend(affected.iter().cloned());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr;

    #[test]
    fn enter_exit_tracks_membership_and_deepest() {
        let mut ctx = EvalContext::new();
        let outer = expr!["outer"];
        let inner = expr!["inner"];

        assert!(!ctx.is_computing(&outer));
        assert!(ctx.deepest().is_none());

        let saved_outer = ctx.enter(&outer);
        assert!(ctx.is_computing(&outer));
        assert_eq!(ctx.deepest(), Some(&outer));

        let saved_inner = ctx.enter(&inner);
        assert!(ctx.is_computing(&inner));
        assert_eq!(ctx.deepest(), Some(&inner));

        ctx.exit(&inner, saved_inner);
        assert!(!ctx.is_computing(&inner));
        assert_eq!(ctx.deepest(), Some(&outer));

        ctx.exit(&outer, saved_outer);
        assert!(!ctx.is_computing(&outer));
        assert!(ctx.deepest().is_none());
    }

    #[test]
    fn cascade_accumulator_has_one_owner() {
        let mut ctx = EvalContext::new();

        assert!(ctx.begin_cascade());
        // A nested cascade does not take ownership.
        assert!(!ctx.begin_cascade());

        let mut affected = HashSet::new();
        affected.insert(expr!["child"]);
        ctx.accumulate(&affected);

        let acc = ctx.end_cascade();
        assert!(acc.contains(&expr!["child"]));

        // Accumulation without an installed cascade is a no-op.
        ctx.accumulate(&affected);
        assert!(ctx.end_cascade().is_empty());
    }
}
