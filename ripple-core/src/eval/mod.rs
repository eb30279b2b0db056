//! The on-demand evaluator.
//!
//! An `Evaluator` resolves expressions against a working copy of a Store.
//! It is the handle predicates receive: `spy` is how a predicate consults
//! another expression with the dependency edge recorded, and the
//! derivative/cascade operations attribute their bookkeeping to the
//! expression currently being computed.
//!
//! # How `get` Works
//!
//! 1. A cached cell short-circuits: a value returns, a thrown cell
//!    re-raises.
//!
//! 2. A function-headed miss evaluates: recursion check, push onto the
//!    computing stack, invoke the predicate, capture the outcome into a
//!    cell, pop.
//!
//! 3. Any other miss is a data read: derivative terms force their creating
//!    expression first (its run may publish the entry being read), then the
//!    cached value or `Null` is returned. The miss itself is not cached.
//!
//! # Outcome capture
//!
//! Values and cacheable errors (predicate failures, the async-incomplete
//! sentinel) are inserted into the cache directly; the expression was
//! already evicted by whatever invalidated it, so no invalidation pass
//! runs. Engine-misuse errors (recursion, derivative misuse) are never
//! cached, and the contributor edges recorded by the aborted run are
//! cleared so the inverse-index invariant holds on the failure path.

mod context;

use std::collections::HashSet;

use tracing::{debug, trace};

use crate::error::EvalError;
use crate::expr::{DerivativeId, Expr, Value};
use crate::store::{ResultCell, Store};

use context::EvalContext;

/// Evaluates expressions against a working Store.
pub struct Evaluator {
    store: Store,
    ctx: EvalContext,
}

impl Evaluator {
    pub fn new(store: Store) -> Self {
        Self {
            store,
            ctx: EvalContext::new(),
        }
    }

    /// The working Store as it currently stands.
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Finish and hand back the evolved Store.
    pub fn into_store(self) -> Store {
        self.store
    }

    /// The deepest expression currently being computed, if any.
    pub fn current_expr(&self) -> Option<&Expr> {
        self.ctx.deepest()
    }

    /// Resolve `e` without recording a dependency edge.
    ///
    /// Inside a predicate this is almost never what you want: use
    /// [`Evaluator::spy`] so the read participates in invalidation.
    pub fn get(&mut self, e: &Expr) -> Result<Value, EvalError> {
        if let Some(cell) = self.store.cached(e) {
            return cell.to_result();
        }
        match e.head() {
            Some(Value::Func(p)) if p.run().is_some() => self.evaluate(e),
            _ => self.resolve_data(e),
        }
    }

    /// Resolve `e` and record that the deepest-computing expression
    /// consulted it.
    ///
    /// The edge is recorded whether the resolution succeeds or fails, so
    /// an expression that catches a failure still recomputes when the
    /// failed contributor changes.
    pub fn spy(&mut self, e: &Expr) -> Result<Value, EvalError> {
        let consumer = self.ctx.deepest().cloned();
        let outcome = self.get(e);
        if let Some(consumer) = consumer {
            self.store.record_edge(&consumer, e);
        }
        outcome
    }

    /// Write a value through the cascade-aware write path.
    ///
    /// Returns the affected set: everything the write invalidated plus the
    /// consequences of any cascade it triggered.
    pub fn set(
        &mut self,
        e: impl Into<Expr>,
        v: impl Into<Value>,
    ) -> Result<HashSet<Expr>, EvalError> {
        self.write(&e.into(), ResultCell::Value(v.into()))
    }

    /// Write `f(get(e))`.
    pub fn modify(
        &mut self,
        e: impl Into<Expr>,
        f: impl FnOnce(Value) -> Value,
    ) -> Result<HashSet<Expr>, EvalError> {
        let e = e.into();
        let current = self.get(&e)?;
        self.write(&e, ResultCell::Value(f(current)))
    }

    /// Obtain a derivative id owned by the expression currently computing.
    pub fn derivative_id(&self, key: impl Into<Value>) -> Result<DerivativeId, EvalError> {
        let creating = self.ctx.deepest().ok_or(EvalError::DerivativeMisuse(
            "derivative_id outside of an in-flight computation",
        ))?;
        Ok(DerivativeId::new(creating.clone(), key.into()))
    }

    /// Publish a derivative expression owned by the current computation.
    ///
    /// Besides the write itself, the derivative is recorded as a dependent
    /// of the creating expression, so invalidating the creator invalidates
    /// every derivative it set.
    pub fn set_derivative(
        &mut self,
        e: impl Into<Expr>,
        v: impl Into<Value>,
    ) -> Result<HashSet<Expr>, EvalError> {
        let creator = self
            .ctx
            .deepest()
            .cloned()
            .ok_or(EvalError::DerivativeMisuse(
                "set_derivative outside of an in-flight computation",
            ))?;
        let e = e.into();
        let affected = self.write(&e, ResultCell::Value(v.into()))?;
        // The write cleared the derivative's incoming edges; re-tie its
        // lifetime to the creator afterwards.
        self.store.record_edge(&e, &creator);
        Ok(affected)
    }

    /// The cascade-aware write path shared by every mutation.
    pub(crate) fn write(
        &mut self,
        e: &Expr,
        cell: ResultCell,
    ) -> Result<HashSet<Expr>, EvalError> {
        let mut affected = self.apply(e, cell.clone());

        let cascade = match (e.head(), &cell) {
            (Some(Value::Func(p)), ResultCell::Value(v)) if p.is_cascading() => {
                Some((p.clone(), v.clone()))
            }
            _ => None,
        };

        if let Some((predicate, value)) = cascade {
            debug!(expr = ?e, predicate = predicate.name(), "running cascade setter");
            let owns_accumulator = self.ctx.begin_cascade();
            let saved = self.ctx.redirect(e);
            let outcome = match predicate.setter() {
                Some(setter) => setter(self, e, &value),
                None => Ok(()),
            };
            self.ctx.restore(saved);
            if owns_accumulator {
                affected.extend(self.ctx.end_cascade());
            }
            outcome?;
        }

        self.ctx.accumulate(&affected);
        Ok(affected)
    }

    /// Evict the affected closure of `e` and insert the new cell.
    fn apply(&mut self, e: &Expr, cell: ResultCell) -> HashSet<Expr> {
        let affected = self.store.affected_closure(e);
        trace!(expr = ?e, affected = affected.len(), "invalidating");
        for a in &affected {
            self.store.remove_cell(a);
            self.store.clear_contributors(a);
        }
        self.store.insert_cell(e, cell);
        affected
    }

    /// Run the predicate of a function-headed, uncached expression.
    fn evaluate(&mut self, e: &Expr) -> Result<Value, EvalError> {
        if self.ctx.is_computing(e) {
            return Err(EvalError::RecursiveComputation(e.clone()));
        }

        let predicate = match e.head() {
            Some(Value::Func(p)) => p.clone(),
            _ => unreachable!("evaluate is only called for function-headed expressions"),
        };
        let args = e.args();

        trace!(expr = ?e, "evaluating");
        let saved = self.ctx.enter(e);
        let outcome = match predicate.run() {
            Some(run) => run(self, &args),
            None => Ok(Value::Null),
        };
        self.ctx.exit(e, saved);

        match outcome {
            Ok(v) => {
                self.store.insert_cell(e, ResultCell::Value(v.clone()));
                Ok(v)
            }
            Err(err) if err.is_cacheable() => {
                self.store.insert_cell(e, ResultCell::Thrown(err.clone()));
                Err(err)
            }
            Err(err) => {
                // Engine misuse: leave no cache entry and no partial edges.
                self.store.clear_contributors(e);
                Err(err)
            }
        }
    }

    /// Resolve a data (non-evaluable) expression.
    fn resolve_data(&mut self, e: &Expr) -> Result<Value, EvalError> {
        // Derivative terms become available once their creator has run.
        let creators: Vec<Expr> = e
            .iter()
            .filter_map(Value::as_derivative)
            .map(|d| d.creating_expr().clone())
            .filter(|creator| !self.store.contains(creator))
            .collect();
        for creator in creators {
            // Forced for its side effects only; its outcome is irrelevant
            // to this read.
            let _ = self.get(&creator);
        }

        match self.store.cached(e) {
            Some(cell) => cell.to_result(),
            None => Ok(Value::Null),
        }
    }
}
