//! Ripple Core
//!
//! This crate provides an expression-keyed incremental computation engine:
//! a content-addressed cache of computed values with automatic dependency
//! tracking, cascading invalidation, and a reactive subscription layer.
//! It implements:
//!
//! - Canonical, value-equatable expressions as cache keys
//! - A persistent store with exact inverse contributor/dependent indices
//! - An on-demand evaluator with cycle detection, derivative expressions,
//!   and cascading-write predicates
//! - A reactor with subscriptions, coalesced change notification, and
//!   asynchronous effect integration
//!
//! # Architecture
//!
//! The crate is organized into several modules, leaves first:
//!
//! - `expr`: expressions, terms, predicates, derivative ids
//! - `store`: the persistent expression→result map and dependency index
//! - `eval`: the evaluator operating on a working store
//! - `reactor`: the live layer (subscribers, flush, async runs)
//! - `bridge`: tagged expressions lifting async calls into the cache
//!
//! Data flows bottom-up: user code asks the [`Reactor`] for a value; the
//! reactor delegates to the evaluator on its current [`Store`]; the
//! evaluator evolves a working store and returns the value; the reactor
//! publishes the new store and queues notifications.
//!
//! # Example
//!
//! ```rust,ignore
//! use ripple_core::{expr, Predicate, Reactor, Value};
//!
//! let reactor = Reactor::new();
//! reactor.set(expr!["base"], 10)?;
//!
//! // A derived value: recomputed only after its inputs change.
//! let double = Predicate::new("double", |ev, _| {
//!     let v = ev.spy(&expr!["base"])?;
//!     Ok(Value::from(v.as_int().unwrap_or(0) * 2))
//! });
//!
//! assert_eq!(reactor.get(expr![double.clone()])?, Value::from(20));
//!
//! // Subscriptions fire on flush, once per invalidated computation.
//! let sub = reactor.subscribe(expr![double.clone()], || println!("changed"));
//! reactor.set(expr!["base"], 7)?;
//! reactor.flush(); // prints "changed"
//! ```

pub mod bridge;
pub mod error;
pub mod eval;
pub mod expr;
pub mod reactor;
pub mod store;

pub use bridge::{
    async_call_result, async_call_status, result_is_ready, spy_async_effect_result,
    AsyncCallStatus,
};
pub use error::EvalError;
pub use eval::Evaluator;
pub use expr::{AsyncFn, DerivativeId, Expr, Predicate, Tag, Value};
pub use reactor::{Reactor, ResultPromise, SubscriberId, Subscription, ValuePromise};
pub use store::{DependencyIndex, ResultCell, Store};
