//! The persistent expression store.
//!
//! A `Store` is purely data: a persistent map from expressions to captured
//! results plus the bidirectional dependency index. Every mutation returns
//! a new Store and leaves the receiver untouched; structural sharing makes
//! the copies cheap.
//!
//! # How Writes Work
//!
//! 1. Compute the affected set: the transitive dependents closure of the
//!    written expression over the *current* index, including the expression
//!    itself.
//!
//! 2. Evict every affected entry: remove it from the cache and clear its
//!    outgoing contributor edges (symmetrically removing it from other
//!    expressions' dependent sets).
//!
//! 3. Insert the new result cell.
//!
//! 4. If the head of the written expression is a cascading predicate, run
//!    its setter; writes it performs are applied after the eviction step
//!    and their affected sets join the originating write's.
//!
//! Reads (`get`) delegate to the evaluator on a working copy of the Store;
//! the evolved copy is returned alongside the outcome so cache entries and
//! edges seeded by evaluation survive.

mod index;

pub use index::DependencyIndex;

use std::collections::HashSet;

use im::HashMap;

use crate::error::EvalError;
use crate::eval::Evaluator;
use crate::expr::{Expr, Value};

/// The captured outcome of a completed computation or a direct write.
#[derive(Clone, PartialEq, Debug)]
pub enum ResultCell {
    /// The predicate returned, or the value was written directly.
    Value(Value),
    /// The predicate raised; reading the cell re-raises.
    Thrown(EvalError),
}

impl ResultCell {
    /// Re-surface the captured outcome.
    pub fn to_result(&self) -> Result<Value, EvalError> {
        match self {
            ResultCell::Value(v) => Ok(v.clone()),
            ResultCell::Thrown(err) => Err(err.clone()),
        }
    }

    /// The captured value, if the outcome was a success.
    pub fn value(&self) -> Option<&Value> {
        match self {
            ResultCell::Value(v) => Some(v),
            ResultCell::Thrown(_) => None,
        }
    }
}

/// Persistent map from expressions to result cells, with dependency edges.
#[derive(Clone, Default, PartialEq, Debug)]
pub struct Store {
    cache: HashMap<Expr, ResultCell>,
    index: DependencyIndex,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    /// The cached cell for `e`, if any.
    pub fn cached(&self, e: &Expr) -> Option<&ResultCell> {
        self.cache.get(e)
    }

    pub fn contains(&self, e: &Expr) -> bool {
        self.cache.contains_key(e)
    }

    /// The expressions `e` consulted during its last evaluation.
    pub fn contributors(&self, e: &Expr) -> im::HashSet<Expr> {
        self.index.contributors_of(e)
    }

    /// The expressions whose last evaluation consulted `e`.
    pub fn dependents(&self, e: &Expr) -> im::HashSet<Expr> {
        self.index.dependents_of(e)
    }

    pub fn index(&self) -> &DependencyIndex {
        &self.index
    }

    /// Every cached expression.
    pub fn cached_exprs(&self) -> impl Iterator<Item = &Expr> {
        self.cache.keys()
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// Write a result cell, returning the new Store and the affected set.
    ///
    /// The affected set contains every expression whose cache entry the
    /// write destroyed (transitively) plus the written expression, and the
    /// consequences of any cascade the write triggered.
    pub fn with_result(
        &self,
        e: impl Into<Expr>,
        cell: ResultCell,
    ) -> Result<(Store, HashSet<Expr>), EvalError> {
        let e = e.into();
        let mut ev = Evaluator::new(self.clone());
        let affected = ev.write(&e, cell)?;
        Ok((ev.into_store(), affected))
    }

    /// Write a value; cascades may run.
    pub fn with(&self, e: impl Into<Expr>, v: impl Into<Value>) -> Result<Store, EvalError> {
        self.with_result(e, ResultCell::Value(v.into()))
            .map(|(store, _)| store)
    }

    /// Write a thrown outcome. Thrown cells never trigger cascades.
    pub fn with_error(&self, e: impl Into<Expr>, err: EvalError) -> Store {
        // Thrown writes cannot fail: the cascade path is value-only.
        match self.with_result(e, ResultCell::Thrown(err)) {
            Ok((store, _)) => store,
            Err(_) => unreachable!("thrown writes do not cascade"),
        }
    }

    /// Write `f(get(e))`. The read side may evaluate and therefore fail.
    pub fn with_modified(
        &self,
        e: impl Into<Expr>,
        f: impl FnOnce(Value) -> Value,
    ) -> Result<(Store, HashSet<Expr>), EvalError> {
        let e = e.into();
        let mut ev = Evaluator::new(self.clone());
        let current = ev.get(&e)?;
        let affected = ev.write(&e, ResultCell::Value(f(current)))?;
        Ok((ev.into_store(), affected))
    }

    /// Resolve `e`, evaluating on a working copy if needed.
    ///
    /// Returns the evolved Store (new cache entries and edges survive)
    /// together with the outcome.
    pub fn get(&self, e: impl Into<Expr>) -> (Store, Result<Value, EvalError>) {
        let e = e.into();
        let mut ev = Evaluator::new(self.clone());
        let outcome = ev.get(&e);
        (ev.into_store(), outcome)
    }

    // -- internal surface for the evaluator ---------------------------------

    pub(crate) fn insert_cell(&mut self, e: &Expr, cell: ResultCell) {
        self.cache.insert(e.clone(), cell);
    }

    pub(crate) fn remove_cell(&mut self, e: &Expr) {
        self.cache.remove(e);
    }

    pub(crate) fn record_edge(&mut self, dependent: &Expr, contributor: &Expr) {
        self.index.record(dependent, contributor);
    }

    pub(crate) fn clear_contributors(&mut self, e: &Expr) {
        self.index.clear_contributors(e);
    }

    pub(crate) fn affected_closure(&self, e: &Expr) -> HashSet<Expr> {
        self.index.affected_closure(e)
    }
}
