use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::value::Value;

/// A session-scoped table letting non-serializable live values round-trip
/// by opaque handle within one encode→decode pair.
///
/// The encoder registers the original value and emits only the handle; the
/// matching decoder looks the handle up and returns the *original* value
/// instance. Clones share the same table, which is how the two sides of one
/// session are tied together. A handle presented to a different session's
/// table is unknown and fails the consuming chunk.
#[derive(Clone, Default)]
pub struct TemporaryReferences {
    inner: Rc<RefCell<Inner>>,
}

#[derive(Default)]
struct Inner {
    by_handle: HashMap<String, Value>,
    by_identity: HashMap<usize, String>,
    next: u64,
}

impl TemporaryReferences {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `value` and return its handle, reusing the existing handle
    /// for an identity seen before so repeated references stay deduplicated.
    pub fn reference(&self, value: &Value) -> String {
        let mut inner = self.inner.borrow_mut();
        if let Some(key) = value.identity_key() {
            if let Some(handle) = inner.by_identity.get(&key) {
                return handle.clone();
            }
        }
        let handle = format!("t{}", inner.next);
        inner.next += 1;
        if let Some(key) = value.identity_key() {
            inner.by_identity.insert(key, handle.clone());
        }
        inner.by_handle.insert(handle.clone(), value.clone());
        handle
    }

    /// Look a handle up, returning the original value instance.
    pub fn resolve(&self, handle: &str) -> Option<Value> {
        self.inner.borrow().by_handle.get(handle).cloned()
    }

    /// Number of registered references.
    pub fn len(&self) -> usize {
        self.inner.borrow().by_handle.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.borrow().by_handle.is_empty()
    }
}

impl std::fmt::Debug for TemporaryReferences {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemporaryReferences")
            .field("entries", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::OpaqueRef;

    #[test]
    fn same_identity_reuses_handle() {
        let refs = TemporaryReferences::new();
        let live = Value::Opaque(OpaqueRef::new(42u32));

        let first = refs.reference(&live);
        let second = refs.reference(&live.clone());
        assert_eq!(first, second);
        assert_eq!(refs.len(), 1);
    }

    #[test]
    fn resolve_returns_original_instance() {
        let refs = TemporaryReferences::new();
        let live = Value::Opaque(OpaqueRef::new("listener"));
        let handle = refs.reference(&live);

        let resolved = refs.resolve(&handle).unwrap();
        match (&live, &resolved) {
            (Value::Opaque(a), Value::Opaque(b)) => assert!(a.ptr_eq(b)),
            other => panic!("unexpected resolution: {other:?}"),
        }
    }

    #[test]
    fn unknown_handle_is_absent() {
        let refs = TemporaryReferences::new();
        assert!(refs.resolve("t99").is_none());
    }

    #[test]
    fn fresh_table_does_not_know_other_sessions() {
        let session_a = TemporaryReferences::new();
        let handle = session_a.reference(&Value::Opaque(OpaqueRef::new(1u8)));

        let session_b = TemporaryReferences::new();
        assert!(session_b.resolve(&handle).is_none());
    }
}
