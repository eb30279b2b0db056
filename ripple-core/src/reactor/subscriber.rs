//! Subscriber identity and the unsubscribe handle.

use std::cell::RefCell;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::expr::Expr;

use super::ReactorState;

/// Unique identifier for a registered callback.
///
/// Deduplication during flush is by id, so one callback subscribed to
/// several pending expressions still fires once per flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

impl SubscriberId {
    /// Generate a new unique subscriber ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

/// A registered change callback.
pub type Callback = Rc<dyn Fn()>;

/// Handle to a registered subscription.
///
/// Dropping (or calling [`Subscription::unsubscribe`]) removes exactly this
/// callback from the reactor; other callbacks on the same expression are
/// untouched, and the expression's bucket is deleted once empty.
pub struct Subscription {
    id: SubscriberId,
    expr: Expr,
    state: Weak<RefCell<ReactorState>>,
}

impl Subscription {
    pub(super) fn new(id: SubscriberId, expr: Expr, state: Weak<RefCell<ReactorState>>) -> Self {
        Self { id, expr, state }
    }

    /// The subscribed expression.
    pub fn expr(&self) -> &Expr {
        &self.expr
    }

    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Detach the callback now. Equivalent to dropping the handle.
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(state) = self.state.upgrade() {
            let mut state = state.borrow_mut();
            let empty = state
                .subscribers
                .get_mut(&self.expr)
                .map(|bucket| {
                    bucket.retain(|(id, _)| *id != self.id);
                    bucket.is_empty()
                })
                .unwrap_or(false);
            if empty {
                state.subscribers.remove(&self.expr);
            }
        }
    }
}
