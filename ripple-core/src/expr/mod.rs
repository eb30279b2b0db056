//! Expressions and their terms.
//!
//! This module defines the key space of the engine: canonical expressions
//! (ordered term sequences), the term sum type, function references, and
//! derivative ids.
//!
//! # Concepts
//!
//! ## Expressions
//!
//! An expression is an ordered sequence of terms whose head is the
//! *predicate*. Function-headed expressions are evaluable; tag-headed
//! expressions are pure data keys. Expressions compare by value and hash
//! structurally, which is what lets them key the persistent cache.
//!
//! ## Terms
//!
//! A term is any [`Value`]: a primitive, a tag, a function reference, a
//! derivative id, or a nested sequence. Function references compare by
//! identity; everything else compares structurally.

mod derivative;
mod expression;
mod predicate;
mod value;

pub use derivative::DerivativeId;
pub use expression::Expr;
pub use predicate::{AsyncFn, AsyncValueFuture, Predicate, PredicateFn, SetterFn};
pub use value::{Tag, Value};
