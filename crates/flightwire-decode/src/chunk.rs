use flightwire_value::{Deferred, DeferredHandle};

/// One row id's slot in the response's chunk table.
///
/// A chunk exists as soon as anything references the id; `defined` flips when
/// the row itself arrives. A forward reference therefore subscribes to the
/// same deferred the later row settles.
pub(crate) struct Chunk {
    pub deferred: Deferred,
    pub handle: DeferredHandle,
    pub defined: bool,
}

impl Chunk {
    pub fn new_pending() -> Self {
        let (deferred, handle) = Deferred::new();
        Self {
            deferred,
            handle,
            defined: false,
        }
    }
}
