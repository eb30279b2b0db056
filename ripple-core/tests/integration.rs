//! Integration tests for the incremental engine.
//!
//! These tests verify that the store, evaluator, reactor, and async bridge
//! work together correctly: end-to-end recompute/notify scenarios first,
//! then the structural invariants that must hold across arbitrary
//! operation sequences.

use std::cell::{Cell, OnceCell};
use std::collections::HashSet;
use std::rc::Rc;

use futures::FutureExt;

use ripple_core::bridge::{self, AsyncCallStatus};
use ripple_core::expr;
use ripple_core::{
    async_call_status, spy_async_effect_result, AsyncFn, Evaluator, EvalError, Expr, Predicate,
    Reactor, ResultCell, Store, Value,
};

/// A predicate computing double the value of `[base]`.
fn double_pred() -> Predicate {
    Predicate::new("double", |ev, _| {
        let v = ev.spy(&expr!["base"])?;
        Ok(Value::from(v.as_int().unwrap_or(0) * 2))
    })
}

/// Check the inverse-index invariant over every tracked expression.
fn assert_inverse_indices(store: &Store) {
    let tracked: Vec<Expr> = store.index().tracked().cloned().collect();
    for e in &tracked {
        for c in store.contributors(e) {
            assert!(
                store.dependents(&c).contains(e),
                "{e:?} consults {c:?} but the dependent edge is missing"
            );
        }
        for d in store.dependents(e) {
            assert!(
                store.contributors(&d).contains(e),
                "{d:?} is a dependent of {e:?} but the contributor edge is missing"
            );
        }
    }
}

/// Transitive contributors of `e` against the current store.
fn contributor_closure(store: &Store, e: &Expr) -> HashSet<Expr> {
    let mut visited = HashSet::new();
    let mut queue = vec![e.clone()];
    while let Some(expr) = queue.pop() {
        if !visited.insert(expr.clone()) {
            continue;
        }
        for c in store.contributors(&expr) {
            queue.push(c.clone());
        }
    }
    visited.remove(e);
    visited
}

// ----------------------------------------------------------------------------
// End-to-end scenarios
// ----------------------------------------------------------------------------

/// Scenario 1: a derived value recomputes after its base changes.
#[test]
fn derived_value_tracks_base_changes() {
    let reactor = Reactor::new();
    let double = expr![double_pred()];

    reactor.set(expr!["base"], 10).unwrap();
    assert_eq!(reactor.get(double.clone()), Ok(Value::from(20)));

    reactor.set(expr!["base"], 7).unwrap();
    assert_eq!(reactor.get(double.clone()), Ok(Value::from(14)));
}

/// Scenario 2: notifications are delivered on flush and gated on
/// recomputation — a second write without an intervening recompute does
/// not re-notify.
#[test]
fn notification_gating_requires_recompute() {
    let reactor = Reactor::new();
    let double = expr![double_pred()];
    let count = Rc::new(Cell::new(0));

    reactor.set(expr!["base"], 5).unwrap();
    let count_in_cb = count.clone();
    let _sub = reactor.subscribe(double.clone(), move || {
        count_in_cb.set(count_in_cb.get() + 1);
    });

    reactor.set(expr!["base"], 6).unwrap();
    // Nothing delivered before flush.
    assert_eq!(count.get(), 0);
    reactor.flush();
    assert_eq!(count.get(), 1);

    // The invalidation cleared the dependency edges; without a recompute
    // the next write does not reach the subscription.
    reactor.set(expr!["base"], 7).unwrap();
    reactor.flush();
    assert_eq!(count.get(), 1);

    // Recompute, then write again: notified once more.
    assert_eq!(reactor.get(double.clone()), Ok(Value::from(14)));
    reactor.set(expr!["base"], 8).unwrap();
    reactor.flush();
    assert_eq!(count.get(), 2);
}

/// Scenario 3 / P5: a self-spying predicate raises the recursion error,
/// and succeeds normally once the recursive call is gone.
#[test]
fn self_spy_raises_recursion_then_recovers() {
    let recurse = Rc::new(Cell::new(true));
    let handle: Rc<OnceCell<Predicate>> = Rc::new(OnceCell::new());

    let recurse_in = recurse.clone();
    let handle_in = handle.clone();
    let rec = Predicate::new("rec", move |ev, _| {
        if recurse_in.get() {
            let me = handle_in.get().cloned().expect("predicate registered");
            ev.spy(&expr![me])
        } else {
            Ok(Value::from(1))
        }
    });
    handle.set(rec.clone()).ok();

    let reactor = Reactor::new();
    let e = expr![rec.clone()];

    assert_eq!(
        reactor.get(e.clone()),
        Err(EvalError::RecursiveComputation(e.clone()))
    );
    // The failure was not cached.
    assert!(!reactor.store().contains(&e));

    // Remove the recursive call; evaluation now completes.
    recurse.set(false);
    assert_eq!(reactor.get(e), Ok(Value::from(1)));
}

/// Scenario 4 / P6: a cascading write runs its setter and the affected set
/// includes everything the cascade wrote.
#[test]
fn cascading_write_reaches_children() {
    let parent = Predicate::cascading("parent", |ev, written, value| {
        let arg = written.terms().get(1).cloned().unwrap_or(Value::Null);
        ev.set(Expr::new([Value::from("CHILD"), value.clone()]), arg)?;
        Ok(())
    });

    let (store, affected) = Store::new()
        .with_result(
            expr![parent.clone(), "B"],
            ResultCell::Value(Value::from("A")),
        )
        .unwrap();

    let (store, child) = store.get(expr!["CHILD", "A"]);
    assert_eq!(child, Ok(Value::from("B")));

    assert!(affected.contains(&expr![parent.clone(), "B"]));
    assert!(affected.contains(&expr!["CHILD", "A"]));
    assert_inverse_indices(&store);
}

/// Nested cascades: consequences of consequences also join the outer
/// write's affected set.
#[test]
fn nested_cascades_accumulate_into_outer_affected_set() {
    let inner = Predicate::cascading("inner-cascade", |ev, _, value| {
        ev.set(expr!["leaf"], value.clone())?;
        Ok(())
    });
    let inner_in_setter = inner.clone();
    let outer = Predicate::cascading("outer-cascade", move |ev, _, value| {
        ev.set(expr![inner_in_setter.clone()], value.clone())?;
        Ok(())
    });

    let (store, affected) = Store::new()
        .with_result(expr![outer.clone()], ResultCell::Value(Value::from(9)))
        .unwrap();

    assert!(affected.contains(&expr![outer]));
    assert!(affected.contains(&expr![inner]));
    assert!(affected.contains(&expr!["leaf"]));

    let (_, leaf) = store.get(expr!["leaf"]);
    assert_eq!(leaf, Ok(Value::from(9)));
}

/// Scenario 5 / P7: derivative entries live exactly as long as the
/// creator generation that published them.
#[test]
fn derivative_lifecycle_follows_creator() {
    let creator = Predicate::new("creator", |ev, _| {
        let base = ev.spy(&expr!["base"])?;
        let text = base.as_str().unwrap_or("").to_string();
        let id = ev.derivative_id("slot")?;
        ev.set_derivative(
            Expr::new([
                Value::from("deriv"),
                Value::Derivative(id.clone()),
                base.clone(),
            ]),
            format!("v-{text}"),
        )?;
        Ok(Value::Derivative(id))
    });

    let reactor = Reactor::new();
    let c = expr![creator.clone()];

    reactor.set(expr!["base"], "x").unwrap();
    let id = match reactor.get(c.clone()) {
        Ok(Value::Derivative(id)) => id,
        other => panic!("creator should return its derivative id, got {other:?}"),
    };
    let deriv_x = expr!["deriv", id.clone(), "x"];
    assert_eq!(reactor.get(deriv_x.clone()), Ok(Value::from("v-x")));

    // Invalidate the creator; its derivative dies with it.
    reactor.set(expr!["base"], "y").unwrap();
    assert!(!reactor.store().contains(&deriv_x));

    // Reading a derivative-keyed expression forces the creator, which
    // publishes the new generation.
    let id2 = match reactor.get(c.clone()) {
        Ok(Value::Derivative(id)) => id,
        other => panic!("creator should return its derivative id, got {other:?}"),
    };
    assert_eq!(
        reactor.get(expr!["deriv", id2, "y"]),
        Ok(Value::from("v-y"))
    );
    // The old generation's entry stays absent.
    assert_eq!(reactor.get(deriv_x), Ok(Value::Null));
}

/// A derivative read forces an uncached creator before looking up the
/// entry, so the entry is available without touching the creator first.
#[test]
fn derivative_read_forces_uncached_creator() {
    let creator = Predicate::new("creator", |ev, _| {
        let id = ev.derivative_id(0)?;
        ev.set_derivative(
            Expr::new([Value::from("slot"), Value::Derivative(id.clone())]),
            "ready",
        )?;
        Ok(Value::Derivative(id))
    });

    let reactor = Reactor::new();
    let c = expr![creator.clone()];

    // Capture the id, then throw the whole store away.
    let id = match reactor.get(c.clone()) {
        Ok(Value::Derivative(id)) => id,
        other => panic!("unexpected {other:?}"),
    };

    let fresh = Reactor::new();
    assert!(!fresh.store().contains(&c));
    assert_eq!(
        fresh.get(expr!["slot", id]),
        Ok(Value::from("ready"))
    );
    assert!(fresh.store().contains(&c));
}

/// Scenario 6: the async lifecycle — at-most-once execution, status
/// transitions, and promise resolution for a composed computation.
#[test]
fn async_run_lifecycle_and_composed_promise() {
    let invocations = Rc::new(Cell::new(0));
    let invocations_in_fn = invocations.clone();
    let fetch = AsyncFn::new("fetch", move |args| {
        invocations_in_fn.set(invocations_in_fn.get() + 1);
        let tail = args
            .first()
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        Box::pin(futures::future::ready(Value::from(format!("fetched-{tail}"))))
    });
    let args = [Value::from("arg")];

    let reactor = Reactor::new();
    let status_view = bridge::call_expr(&fetch, &args).with_head(async_call_status());

    assert_eq!(
        reactor.get(status_view.clone()),
        Ok(AsyncCallStatus::NotStarted.to_value())
    );

    let first = reactor.ensure_async_run(&fetch, args.to_vec());
    assert_eq!(invocations.get(), 1);
    assert_eq!(
        reactor.get(status_view.clone()),
        Ok(AsyncCallStatus::Executing.to_value())
    );

    // Re-ensuring returns the parked promise without re-invoking.
    let second = reactor.ensure_async_run(&fetch, args.to_vec());
    assert_eq!(invocations.get(), 1);

    reactor.run_until_stalled();
    assert_eq!(
        reactor.get(status_view),
        Ok(AsyncCallStatus::Complete.to_value())
    );
    assert_eq!(
        first.now_or_never(),
        Some(Value::from("fetched-arg"))
    );
    assert_eq!(
        second.now_or_never(),
        Some(Value::from("fetched-arg"))
    );

    // A computation composed over the call resolves through the promise
    // surface.
    let fetch_in_outer = fetch.clone();
    let outer = Predicate::new("outer", move |ev, _| {
        let spy_view = bridge::call_expr(&fetch_in_outer, &[Value::from("arg")])
            .with_head(spy_async_effect_result());
        let fetched = ev.spy(&spy_view)?;
        let text = fetched.as_str().unwrap_or("").to_string();
        Ok(Value::from(format!("composed-{text}")))
    });

    let promise = reactor.result_promise(expr![outer]);
    assert_eq!(
        promise.now_or_never(),
        Some(Ok(Value::from("composed-fetched-arg")))
    );
}

/// A promise requested before completion resolves on the completing flush.
#[test]
fn result_promise_resolves_on_completion() {
    let fetch = AsyncFn::new("fetch", |_| {
        Box::pin(futures::future::ready(Value::from("payload")))
    });
    let args = [Value::from("k")];

    let fetch_in_outer = fetch.clone();
    let outer = Predicate::new("outer", move |ev, _| {
        let spy_view = bridge::call_expr(&fetch_in_outer, &[Value::from("k")])
            .with_head(spy_async_effect_result());
        ev.spy(&spy_view)
    });

    let reactor = Reactor::new();
    let promise = reactor.result_promise(expr![outer.clone()]);
    // Not ready: the call has not even started.
    assert!(promise.clone().now_or_never().is_none());

    let _running = reactor.ensure_async_run(&fetch, args.to_vec());
    reactor.run_until_stalled();

    assert_eq!(
        promise.now_or_never(),
        Some(Ok(Value::from("payload")))
    );
}

/// The ensured promise starts the async work the expression depends on.
#[test]
fn ensured_result_promise_starts_dependent_calls() {
    let invocations = Rc::new(Cell::new(0));
    let invocations_in_fn = invocations.clone();
    let fetch = AsyncFn::new("fetch", move |_| {
        invocations_in_fn.set(invocations_in_fn.get() + 1);
        Box::pin(futures::future::ready(Value::from(21)))
    });

    let fetch_in_outer = fetch.clone();
    let outer = Predicate::new("outer", move |ev, _| {
        let spy_view = bridge::call_expr(&fetch_in_outer, &[])
            .with_head(spy_async_effect_result());
        let v = ev.spy(&spy_view)?;
        Ok(Value::from(v.as_int().unwrap_or(0) * 2))
    });

    let reactor = Reactor::new();
    let promise = reactor.ensured_result_promise(expr![outer]);
    // Waiting scheduled the work.
    assert_eq!(invocations.get(), 1);

    reactor.run_until_stalled();
    assert_eq!(promise.now_or_never(), Some(Ok(Value::from(42))));
}

// ----------------------------------------------------------------------------
// Invariants
// ----------------------------------------------------------------------------

/// P1: contributor and dependent indices stay exact inverses at every
/// observation point of a mixed operation sequence.
#[test]
fn indices_stay_inverse_across_operations() {
    let double = double_pred();
    let double_in_quad = double.clone();
    let quadruple = Predicate::new("quadruple", move |ev, _| {
        let v = ev.spy(&expr![double_in_quad.clone()])?;
        Ok(Value::from(v.as_int().unwrap_or(0) * 2))
    });

    let reactor = Reactor::new();
    assert_inverse_indices(&reactor.store());

    reactor.set(expr!["base"], 3).unwrap();
    assert_inverse_indices(&reactor.store());

    reactor.get(expr![quadruple.clone()]).unwrap();
    assert_inverse_indices(&reactor.store());

    reactor.set(expr!["base"], 4).unwrap();
    assert_inverse_indices(&reactor.store());

    reactor.get(expr![double]).unwrap();
    assert_inverse_indices(&reactor.store());

    reactor
        .modify(expr!["base"], |v| Value::from(v.as_int().unwrap_or(0) + 1))
        .unwrap();
    assert_inverse_indices(&reactor.store());
}

/// P2: a second read changes nothing — same value, identical store.
#[test]
fn reads_are_idempotent() {
    let store = Store::new().with(expr!["base"], 10).unwrap();
    let double = expr![double_pred()];

    let (after_first, first) = store.get(double.clone());
    let (after_second, second) = after_first.get(double);

    assert_eq!(first, Ok(Value::from(20)));
    assert_eq!(second, Ok(Value::from(20)));
    assert!(after_first == after_second);
}

/// P3: after a write, no cached entry transitively depends on the
/// written expression.
#[test]
fn invalidation_is_complete() {
    let double = double_pred();
    let double_in_quad = double.clone();
    let quadruple = Predicate::new("quadruple", move |ev, _| {
        let v = ev.spy(&expr![double_in_quad.clone()])?;
        Ok(Value::from(v.as_int().unwrap_or(0) * 2))
    });

    let reactor = Reactor::new();
    reactor.set(expr!["base"], 1).unwrap();
    reactor.get(expr![double.clone()]).unwrap();
    reactor.get(expr![quadruple.clone()]).unwrap();

    reactor.set(expr!["base"], 2).unwrap();

    let store = reactor.store();
    let cached: Vec<Expr> = store.cached_exprs().cloned().collect();
    for e in cached {
        assert!(
            !contributor_closure(&store, &e).contains(&expr!["base"]),
            "{e:?} survived invalidation while depending on [base]"
        );
    }
}

/// P4: a cached read replays from the cached values of its contributors.
#[test]
fn cached_reads_replay_from_contributors() {
    let reactor = Reactor::new();
    let double = expr![double_pred()];

    reactor.set(expr!["base"], 10).unwrap();
    let observed = reactor.get(double.clone()).unwrap();
    let store = reactor.store();

    // Rebuild a store holding only the contributors' cached cells and
    // replay the computation against it.
    let mut replay = Store::new();
    for c in store.contributors(&double) {
        let cell = store.cached(&c).expect("contributor is cached").clone();
        let (next, _) = replay.with_result(c.clone(), cell).unwrap();
        replay = next;
    }
    let mut ev = Evaluator::new(replay);
    assert_eq!(ev.get(&double), Ok(observed));
}

/// Failed evaluations participate in caching and invalidation like
/// successes: re-read re-raises, invalidation re-arms.
#[test]
fn failures_cache_and_invalidate_like_values() {
    let attempts = Rc::new(Cell::new(0));
    let attempts_in_pred = attempts.clone();
    let brittle = Predicate::new("brittle", move |ev, _| {
        attempts_in_pred.set(attempts_in_pred.get() + 1);
        let v = ev.spy(&expr!["base"])?;
        match v.as_int() {
            Some(n) if n >= 0 => Ok(Value::from(n)),
            _ => Err(EvalError::failure("negative input")),
        }
    });

    let reactor = Reactor::new();
    let e = expr![brittle.clone()];

    reactor.set(expr!["base"], -1).unwrap();
    assert_eq!(reactor.get(e.clone()), Err(EvalError::failure("negative input")));
    assert_eq!(reactor.get(e.clone()), Err(EvalError::failure("negative input")));
    // The second read came from the cache.
    assert_eq!(attempts.get(), 1);

    // Fixing the base invalidates the thrown cell like any dependent.
    reactor.set(expr!["base"], 5).unwrap();
    assert_eq!(reactor.get(e), Ok(Value::from(5)));
    assert_eq!(attempts.get(), 2);
}

/// The affected set of a write is computed before deletion, so a chain of
/// dependents is destroyed in one step regardless of edge order.
#[test]
fn affected_set_covers_whole_chain() {
    let double = double_pred();
    let double_in_quad = double.clone();
    let quadruple = Predicate::new("quadruple", move |ev, _| {
        let v = ev.spy(&expr![double_in_quad.clone()])?;
        Ok(Value::from(v.as_int().unwrap_or(0) * 2))
    });

    let store = Store::new().with(expr!["base"], 1).unwrap();
    let (store, _) = store.get(expr![quadruple.clone()]);

    let (store, affected) = store
        .with_result(expr!["base"], ResultCell::Value(Value::from(2)))
        .unwrap();

    assert!(affected.contains(&expr!["base"]));
    assert!(affected.contains(&expr![double.clone()]));
    assert!(affected.contains(&expr![quadruple.clone()]));

    assert!(!store.contains(&expr![double]));
    assert!(!store.contains(&expr![quadruple]));
}
