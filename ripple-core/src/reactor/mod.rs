//! The reactive layer.
//!
//! The reactor turns the pure store into a live data-flow system. It owns
//! the current Store, a subscriber table, and the set of expressions whose
//! entries were destroyed by writes since the last flush.
//!
//! # How Updates Propagate
//!
//! 1. `set`/`modify` apply the corresponding pure Store operation, publish
//!    the new Store, and union the write's affected set into `pending`.
//!
//! 2. `flush` takes the pending set and invokes every callback subscribed
//!    to a pending expression, each at most once. Deliveries happen with
//!    the reactor released, so callbacks may freely read and write.
//!
//! 3. A subscribed expression is re-notified only after something
//!    recomputes it: invalidation cleared its dependency edges, so further
//!    writes to the same base no longer reach it until a `get` re-seeds
//!    the edges. (Subscribing performs one seeding `get` up front.)
//!
//! # Asynchrony
//!
//! The engine itself is single-threaded and synchronous. The only admitted
//! concurrency is at I/O boundaries: `ensure_async_run` invokes a
//! user-supplied function returning a future, parks the shared promise
//! under the `(promise, f, args…)` key, and spawns a continuation on the
//! reactor's local executor. When the future resolves, the continuation
//! re-enters the reactor on the same logical task: it writes the result
//! and completion status, then flushes. `result_promise` and
//! `ensured_result_promise` build readiness-driven futures on top.

mod subscriber;

pub use subscriber::{Callback, SubscriberId, Subscription};

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use futures::channel::oneshot;
use futures::executor::{LocalPool, LocalSpawner};
use futures::future::{self, LocalBoxFuture, Shared};
use futures::task::LocalSpawnExt;
use futures::FutureExt;
use tracing::{debug, trace, warn};

use crate::bridge::{self, AsyncCallStatus};
use crate::error::EvalError;
use crate::eval::Evaluator;
use crate::expr::{AsyncFn, Expr, Value};
use crate::store::{ResultCell, Store};

/// A shared future of a raw async-run value.
pub type ValuePromise = Shared<LocalBoxFuture<'static, Value>>;

/// A shared future of an expression outcome.
pub type ResultPromise = Shared<LocalBoxFuture<'static, Result<Value, EvalError>>>;

pub(crate) struct ReactorState {
    db: Store,
    subscribers: HashMap<Expr, Vec<(SubscriberId, Callback)>>,
    pending: HashSet<Expr>,
    promises: HashMap<Expr, ValuePromise>,
}

/// The live engine: current Store, subscribers, pending notifications.
///
/// `Reactor` is a cheap cloneable handle; clones share state. It is
/// single-threaded by design and not `Send`.
#[derive(Clone)]
pub struct Reactor {
    state: Rc<RefCell<ReactorState>>,
    executor: Rc<RefCell<LocalPool>>,
    spawner: LocalSpawner,
}

impl Reactor {
    pub fn new() -> Self {
        let pool = LocalPool::new();
        let spawner = pool.spawner();
        Self {
            state: Rc::new(RefCell::new(ReactorState {
                db: Store::new(),
                subscribers: HashMap::new(),
                pending: HashSet::new(),
                promises: HashMap::new(),
            })),
            executor: Rc::new(RefCell::new(pool)),
            spawner,
        }
    }

    /// A snapshot of the current Store.
    pub fn store(&self) -> Store {
        self.state.borrow().db.clone()
    }

    /// Resolve `e` against the current Store.
    ///
    /// Evaluation happens on a working copy which is then published, so
    /// cache entries and dependency edges seeded by the read survive.
    pub fn get(&self, e: impl Into<Expr>) -> Result<Value, EvalError> {
        let mut state = self.state.borrow_mut();
        let (db, outcome) = state.db.get(e);
        state.db = db;
        outcome
    }

    /// Write a value; queues notifications for everything invalidated.
    pub fn set(&self, e: impl Into<Expr>, v: impl Into<Value>) -> Result<(), EvalError> {
        let mut state = self.state.borrow_mut();
        let (db, affected) = state.db.with_result(e, ResultCell::Value(v.into()))?;
        state.db = db;
        state.pending.extend(affected);
        Ok(())
    }

    /// Write `f(get(e))`; queues notifications like `set`.
    pub fn modify(
        &self,
        e: impl Into<Expr>,
        f: impl FnOnce(Value) -> Value,
    ) -> Result<(), EvalError> {
        let mut state = self.state.borrow_mut();
        let (db, affected) = state.db.with_modified(e, f)?;
        state.db = db;
        state.pending.extend(affected);
        Ok(())
    }

    /// Register `cb` for change notifications on `e`.
    ///
    /// One `get` seeds the dependency edges; its outcome (value or error)
    /// is deliberately discarded. The returned handle detaches exactly
    /// this callback when dropped.
    pub fn subscribe(&self, e: impl Into<Expr>, cb: impl Fn() + 'static) -> Subscription {
        let e = e.into();
        let mut state = self.state.borrow_mut();

        let (db, _) = state.db.get(e.clone());
        state.db = db;

        let id = SubscriberId::new();
        state
            .subscribers
            .entry(e.clone())
            .or_default()
            .push((id, Rc::new(cb)));
        Subscription::new(id, e, Rc::downgrade(&self.state))
    }

    /// Deliver queued notifications.
    ///
    /// The pending set is taken before delivery: writes performed by
    /// callbacks coalesce into the next flush. Each callback is invoked at
    /// most once per flush, regardless of how many pending expressions it
    /// is subscribed to.
    pub fn flush(&self) {
        let callbacks = {
            let mut state = self.state.borrow_mut();
            let pending = std::mem::take(&mut state.pending);
            trace!(pending = pending.len(), "flushing");

            let mut delivered = HashSet::new();
            let mut callbacks: Vec<Callback> = Vec::new();
            for e in &pending {
                if let Some(bucket) = state.subscribers.get(e) {
                    for (id, cb) in bucket {
                        if delivered.insert(*id) {
                            callbacks.push(cb.clone());
                        }
                    }
                }
            }
            callbacks
        };

        // State is released: callbacks may re-enter the reactor.
        for cb in callbacks {
            cb();
        }
    }

    /// Drive the local executor until no spawned continuation can progress.
    pub fn run_until_stalled(&self) {
        self.executor.borrow_mut().run_until_stalled();
    }

    /// Start an asynchronous run of `f(args…)` at most once.
    ///
    /// A missing status cell means not-started: the status is set to
    /// executing, `f` is invoked, and its future is parked (shared) under
    /// the promise key. When the future resolves, the continuation writes
    /// the result cell, then the completion status, then flushes. If the
    /// status cell already exists the parked promise is returned and `f`
    /// is not invoked again.
    pub fn ensure_async_run(&self, f: &AsyncFn, args: impl Into<Vec<Value>>) -> ValuePromise {
        let args = args.into();
        let status_e = bridge::status_expr(f, &args);
        let promise_e = bridge::promise_expr(f, &args);

        {
            let state = self.state.borrow();
            if state.db.contains(&status_e) {
                if let Some(parked) = state.promises.get(&promise_e) {
                    return parked.clone();
                }
                // Status written by hand, no parked future: settle with
                // whatever result cell exists.
                let settled = state
                    .db
                    .cached(&bridge::result_expr(f, &args))
                    .and_then(ResultCell::value)
                    .cloned()
                    .unwrap_or(Value::Null);
                return future::ready(settled).boxed_local().shared();
            }
        }

        debug!(func = f.name(), "starting async run");
        {
            let mut state = self.state.borrow_mut();
            let executing = AsyncCallStatus::Executing.to_value();
            state.commit(&status_e, executing);
        }

        // Invoked with the reactor released, in case the function body does
        // eager work before returning its future.
        let fut = f.call(&args);

        let (tx, rx) = oneshot::channel::<Value>();
        let parked: ValuePromise = rx
            .map(|delivered| delivered.unwrap_or(Value::Null))
            .boxed_local()
            .shared();
        self.state
            .borrow_mut()
            .promises
            .insert(promise_e, parked.clone());

        let reactor = self.clone();
        let f = f.clone();
        self.spawner
            .spawn_local(async move {
                let v = fut.await;
                reactor.finish_async(&f, &args, v.clone());
                let _ = tx.send(v);
            })
            .expect("local executor is gone");

        parked
    }

    /// A future of `e`'s outcome, resolved when `e` becomes ready.
    ///
    /// Readiness is the synchronous evaluation of `[result-is-ready, …e]`:
    ///
    /// - if that evaluation itself raises, the future is already rejected;
    /// - if `e` is ready now, the future is already settled with `get(e)`
    ///   (thrown cells route to rejection);
    /// - otherwise the reactor subscribes to the readiness expression and
    ///   settles the future on the flush that reports readiness, then
    ///   unsubscribes.
    pub fn result_promise(&self, e: impl Into<Expr>) -> ResultPromise {
        let e = e.into();
        let ready = bridge::ready_expr(&e);
        match self.get(ready.clone()) {
            Err(err) => future::ready(Err(err)).boxed_local().shared(),
            Ok(v) if v == Value::Bool(true) => {
                future::ready(self.get(e)).boxed_local().shared()
            }
            Ok(_) => self.promise_on_ready(e, ready, None),
        }
    }

    /// Like [`Reactor::result_promise`], but waiting also starts the
    /// asynchronous work `e` transitively depends on.
    ///
    /// Every `AsyncCallIncomplete(call)` surfaced while polling `e` has its
    /// call handed to [`Reactor::ensure_async_run`], exactly once per
    /// distinct call; polling repeats at each readiness notification until
    /// no unstarted call remains.
    pub fn ensured_result_promise(&self, e: impl Into<Expr>) -> ResultPromise {
        let e = e.into();
        let ready = bridge::ready_expr(&e);
        let started = Rc::new(RefCell::new(HashSet::new()));

        if let Some(outcome) = self.poll_ensured(&e, &started) {
            return future::ready(outcome).boxed_local().shared();
        }
        self.promise_on_ready(e, ready, Some(started))
    }

    /// One polling step of the ensured protocol: evaluate `e`, starting
    /// any newly named async call. `None` means not ready yet.
    fn poll_ensured(
        &self,
        e: &Expr,
        started: &Rc<RefCell<HashSet<Expr>>>,
    ) -> Option<Result<Value, EvalError>> {
        loop {
            match self.get(e.clone()) {
                Err(EvalError::AsyncCallIncomplete(call)) => {
                    if started.borrow_mut().insert(call.clone()) {
                        self.ensure_async_call(&call);
                        continue;
                    }
                    return None;
                }
                outcome => return Some(outcome),
            }
        }
    }

    /// Subscribe to `ready` and settle a fresh promise once it reports
    /// readiness. With a started-set, each notification also runs the
    /// ensured polling step.
    fn promise_on_ready(
        &self,
        e: Expr,
        ready: Expr,
        started: Option<Rc<RefCell<HashSet<Expr>>>>,
    ) -> ResultPromise {
        struct Delivery {
            tx: Option<oneshot::Sender<Result<Value, EvalError>>>,
            subscription: Option<Subscription>,
        }

        let (tx, rx) = oneshot::channel();
        let delivery = Rc::new(RefCell::new(Delivery {
            tx: Some(tx),
            subscription: None,
        }));

        let reactor = self.clone();
        let delivery_in_cb = delivery.clone();
        let subscription = self.subscribe(ready.clone(), move || {
            let outcome = match &started {
                Some(started) => reactor.poll_ensured(&e, started),
                None => match reactor.get(ready.clone()) {
                    Ok(v) if v == Value::Bool(true) => Some(reactor.get(e.clone())),
                    Err(err) => Some(Err(err)),
                    Ok(_) => None,
                },
            };
            if let Some(outcome) = outcome {
                let mut delivery = delivery_in_cb.borrow_mut();
                if let Some(tx) = delivery.tx.take() {
                    let _ = tx.send(outcome);
                }
                // Readiness delivered; detach from further notifications.
                delivery.subscription.take();
            }
        });
        delivery.borrow_mut().subscription = Some(subscription);

        rx.map(|delivered| {
            delivered.unwrap_or_else(|_| {
                Err(EvalError::failure("reactor dropped before readiness"))
            })
        })
        .boxed_local()
        .shared()
    }

    /// `ensure_async_run` addressed by a call expression `(f, args…)`.
    fn ensure_async_call(&self, call: &Expr) {
        match bridge::parse_call(call) {
            Some((f, args)) => {
                let _ = self.ensure_async_run(&f, args);
            }
            None => warn!(call = ?call, "incomplete sentinel named a non-call expression"),
        }
    }

    /// Continuation run when an async future resolves: record the result,
    /// mark the call complete, deliver notifications.
    fn finish_async(&self, f: &AsyncFn, args: &[Value], v: Value) {
        debug!(func = f.name(), "async run complete");
        {
            let mut state = self.state.borrow_mut();
            state.commit(&bridge::result_expr(f, args), v);
            state.commit(
                &bridge::status_expr(f, args),
                AsyncCallStatus::Complete.to_value(),
            );
        }
        self.flush();
    }
}

impl ReactorState {
    /// Apply a plain (tag-headed) write and queue its affected set.
    fn commit(&mut self, e: &Expr, v: Value) {
        let mut ev = Evaluator::new(self.db.clone());
        let affected = ev
            .set(e.clone(), v)
            .expect("tag-headed writes cannot cascade");
        self.db = ev.into_store();
        self.pending.extend(affected);
    }
}

impl Default for Reactor {
    fn default() -> Self {
        Self::new()
    }
}
