use std::collections::HashMap;

use flightwire_value::{ModuleReference, OpaqueRef};

/// Maps live module-bound values to their wire module references.
///
/// The encoder consults this for every opaque value: a hit emits a module
/// reference row instead of failing classification.
pub trait ModuleMap {
    fn module_for(&self, value: &OpaqueRef) -> Option<ModuleReference>;
}

/// A module map backed by a registration table keyed on object identity.
#[derive(Default)]
pub struct StaticModuleMap {
    entries: HashMap<usize, ModuleReference>,
}

impl StaticModuleMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the wire reference for a live value.
    pub fn register(&mut self, value: &OpaqueRef, reference: ModuleReference) {
        self.entries.insert(value.identity_key(), reference);
    }
}

impl ModuleMap for StaticModuleMap {
    fn module_for(&self, value: &OpaqueRef) -> Option<ModuleReference> {
        self.entries.get(&value.identity_key()).cloned()
    }
}
