use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::task::{Context, Poll, Waker};

use crate::error::ErrorValue;
use crate::value::Value;

/// Terminal outcome of a [`Deferred`]: the value it settled to, or the
/// error it was rejected with.
pub type SettleResult = Result<Value, ErrorValue>;

enum Continuation {
    Notify(Box<dyn FnOnce(&SettleResult)>),
    Wake(Waker),
}

enum State {
    Pending(Vec<Continuation>),
    Settled(SettleResult),
}

/// A one-shot settle cell.
///
/// `Deferred` is the protocol's only suspension primitive: the decoder backs
/// every chunk with one, and `Value::Promise` wraps one on both sides.
/// Continuations registered while pending are invoked exactly once, in
/// registration order, when the cell settles. A settled cell never changes.
///
/// Clones share the same cell. The cell also implements [`Future`], so a
/// consuming layer with an executor can simply `.await` it.
pub struct Deferred {
    cell: Rc<RefCell<State>>,
}

/// The settle-once producer side of a [`Deferred`].
///
/// Holds only a weak reference: if every consumer dropped the deferred,
/// settling becomes a no-op. A second settle attempt returns `false`.
#[derive(Clone)]
pub struct DeferredHandle {
    cell: Weak<RefCell<State>>,
}

impl Deferred {
    /// Create a pending deferred and its settle handle.
    pub fn new() -> (Deferred, DeferredHandle) {
        let cell = Rc::new(RefCell::new(State::Pending(Vec::new())));
        let handle = DeferredHandle {
            cell: Rc::downgrade(&cell),
        };
        (Deferred { cell }, handle)
    }

    /// Create an already-settled deferred.
    pub fn settled(result: SettleResult) -> Deferred {
        Deferred {
            cell: Rc::new(RefCell::new(State::Settled(result))),
        }
    }

    /// Create a deferred already resolved to `value`.
    pub fn resolved(value: Value) -> Deferred {
        Self::settled(Ok(value))
    }

    /// Create a deferred already rejected with `error`.
    pub fn rejected(error: ErrorValue) -> Deferred {
        Self::settled(Err(error))
    }

    /// True while the cell has not settled.
    pub fn is_pending(&self) -> bool {
        matches!(*self.cell.borrow(), State::Pending(_))
    }

    /// The settled outcome, if any. Pending cells return `None`.
    pub fn try_result(&self) -> Option<SettleResult> {
        match &*self.cell.borrow() {
            State::Pending(_) => None,
            State::Settled(result) => Some(result.clone()),
        }
    }

    /// Register a continuation invoked exactly once on settlement.
    ///
    /// If the cell already settled, `f` runs immediately (outside any
    /// internal borrow, so it may freely inspect this deferred).
    pub fn on_settle(&self, f: impl FnOnce(&SettleResult) + 'static) {
        let settled = match &mut *self.cell.borrow_mut() {
            State::Pending(continuations) => {
                continuations.push(Continuation::Notify(Box::new(f)));
                return;
            }
            State::Settled(result) => result.clone(),
        };
        f(&settled);
    }

    /// True if `other` shares this cell.
    pub fn ptr_eq(&self, other: &Deferred) -> bool {
        Rc::ptr_eq(&self.cell, &other.cell)
    }

    /// Stable identity of the underlying cell while it is alive.
    pub fn identity_key(&self) -> usize {
        Rc::as_ptr(&self.cell) as usize
    }
}

impl Clone for Deferred {
    fn clone(&self) -> Self {
        Deferred {
            cell: Rc::clone(&self.cell),
        }
    }
}

impl fmt::Debug for Deferred {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.cell.borrow() {
            State::Pending(continuations) => f
                .debug_struct("Deferred")
                .field("state", &"pending")
                .field("continuations", &continuations.len())
                .finish(),
            State::Settled(Ok(_)) => f
                .debug_struct("Deferred")
                .field("state", &"resolved")
                .finish(),
            State::Settled(Err(err)) => f
                .debug_struct("Deferred")
                .field("state", &"errored")
                .field("error", &err.message)
                .finish(),
        }
    }
}

impl Future for Deferred {
    type Output = SettleResult;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<SettleResult> {
        let mut state = self.cell.borrow_mut();
        match &mut *state {
            State::Settled(result) => Poll::Ready(result.clone()),
            State::Pending(continuations) => {
                continuations.push(Continuation::Wake(cx.waker().clone()));
                Poll::Pending
            }
        }
    }
}

impl DeferredHandle {
    /// Resolve the deferred with `value`. Returns `false` if the cell is
    /// gone or already settled.
    pub fn resolve(&self, value: Value) -> bool {
        self.settle(Ok(value))
    }

    /// Reject the deferred with `error`. Returns `false` if the cell is
    /// gone or already settled.
    pub fn reject(&self, error: ErrorValue) -> bool {
        self.settle(Err(error))
    }

    /// Settle the deferred. A cell settles at most once.
    pub fn settle(&self, result: SettleResult) -> bool {
        let Some(cell) = self.cell.upgrade() else {
            return false;
        };

        let continuations = {
            let mut state = cell.borrow_mut();
            match std::mem::replace(&mut *state, State::Settled(result)) {
                State::Pending(continuations) => continuations,
                State::Settled(previous) => {
                    // Settled cells are terminal; put the original back.
                    *state = State::Settled(previous);
                    return false;
                }
            }
        };

        let result = match &*cell.borrow() {
            State::Settled(result) => result.clone(),
            State::Pending(_) => unreachable!("cell settled above"),
        };

        for continuation in continuations {
            match continuation {
                Continuation::Notify(f) => f(&result),
                Continuation::Wake(waker) => waker.wake(),
            }
        }
        true
    }

    /// True while the target cell is alive and pending.
    pub fn is_pending(&self) -> bool {
        match self.cell.upgrade() {
            Some(cell) => matches!(*cell.borrow(), State::Pending(_)),
            None => false,
        }
    }
}

impl fmt::Debug for DeferredHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredHandle")
            .field("pending", &self.is_pending())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::future::Future;
    use std::pin::pin;
    use std::rc::Rc;
    use std::task::{Context, Poll};

    use futures_util::task::noop_waker;

    use super::*;

    #[test]
    fn resolve_invokes_continuations_in_order() {
        let (deferred, handle) = Deferred::new();
        let order = Rc::new(RefCell::new(Vec::new()));

        for label in ["first", "second", "third"] {
            let order = Rc::clone(&order);
            deferred.on_settle(move |result| {
                assert!(result.is_ok());
                order.borrow_mut().push(label);
            });
        }

        assert!(handle.resolve(Value::Null));
        assert_eq!(*order.borrow(), vec!["first", "second", "third"]);
    }

    #[test]
    fn settle_is_one_shot() {
        let (deferred, handle) = Deferred::new();
        assert!(handle.resolve(Value::Bool(true)));
        assert!(!handle.resolve(Value::Bool(false)));
        assert!(!handle.reject(ErrorValue::new("late")));

        match deferred.try_result() {
            Some(Ok(Value::Bool(true))) => {}
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn continuation_after_settlement_runs_immediately() {
        let (deferred, handle) = Deferred::new();
        handle.reject(ErrorValue::new("boom"));

        let seen = Rc::new(RefCell::new(None));
        let seen_clone = Rc::clone(&seen);
        deferred.on_settle(move |result| {
            *seen_clone.borrow_mut() = Some(result.clone().unwrap_err().message);
        });

        assert_eq!(seen.borrow().as_deref(), Some("boom"));
    }

    #[test]
    fn settle_without_consumers_is_noop() {
        let (deferred, handle) = Deferred::new();
        drop(deferred);
        assert!(!handle.resolve(Value::Null));
    }

    #[test]
    fn future_polls_pending_then_ready() {
        let (deferred, handle) = Deferred::new();
        let waker = noop_waker();
        let mut cx = Context::from_waker(&waker);

        let mut polled = pin!(deferred.clone());
        assert!(matches!(polled.as_mut().poll(&mut cx), Poll::Pending));

        handle.resolve(Value::Number(7.0));
        match polled.as_mut().poll(&mut cx) {
            Poll::Ready(Ok(Value::Number(n))) => assert_eq!(n, 7.0),
            other => panic!("unexpected poll outcome: {other:?}"),
        }
    }

    #[test]
    fn clones_share_the_cell() {
        let (deferred, handle) = Deferred::new();
        let clone = deferred.clone();
        assert!(deferred.ptr_eq(&clone));

        handle.resolve(Value::Null);
        assert!(!clone.is_pending());
    }
}
