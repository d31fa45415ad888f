use std::cell::Cell;
use std::rc::Rc;

/// Cancellation signal observed by an encode session.
///
/// Sessions are single-threaded by design, so the flag is a shared cell
/// rather than an atomic; cancellation is checked at row-emission
/// boundaries. Rows already emitted stay valid, and the session terminates
/// the stream with an explicit abort row rather than going silent.
#[derive(Clone)]
pub struct CancelSignal {
    fired: Rc<Cell<bool>>,
}

/// The firing side of a [`CancelSignal`].
#[derive(Clone)]
pub struct CancelTrigger {
    fired: Rc<Cell<bool>>,
}

impl CancelSignal {
    /// Create a signal and its trigger.
    pub fn new() -> (CancelSignal, CancelTrigger) {
        let fired = Rc::new(Cell::new(false));
        (
            CancelSignal {
                fired: Rc::clone(&fired),
            },
            CancelTrigger { fired },
        )
    }

    /// True once the trigger fired.
    pub fn is_cancelled(&self) -> bool {
        self.fired.get()
    }
}

impl CancelTrigger {
    /// Fire the signal. Idempotent.
    pub fn cancel(&self) {
        self.fired.set(true);
    }
}

impl std::fmt::Debug for CancelSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelSignal")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_once_and_stays_fired() {
        let (signal, trigger) = CancelSignal::new();
        assert!(!signal.is_cancelled());

        trigger.cancel();
        assert!(signal.is_cancelled());

        trigger.cancel();
        assert!(signal.is_cancelled());
    }

    #[test]
    fn clones_observe_the_same_flag() {
        let (signal, trigger) = CancelSignal::new();
        let observer = signal.clone();
        trigger.clone().cancel();
        assert!(observer.is_cancelled());
    }
}
