use std::collections::HashMap;

use flightwire_value::{Deferred, ErrorValue, Value};

/// Outcome of resolving one module reference.
pub enum ModuleLoad {
    /// The export is available now.
    Ready(Value),
    /// Loading; the deferred settles with the export once it completes.
    Pending(Deferred),
    /// The module or export does not exist on this side.
    Failed(ErrorValue),
}

/// Turns wire module references back into live values on the consumer side.
///
/// Loads are cached per (module, export) pair by the response, so a resolver
/// is called at most once for each distinct reference.
pub trait ModuleResolver {
    fn resolve(&self, module_id: &str, export_name: &str) -> ModuleLoad;
}

/// A resolver backed by a pre-registered export table.
#[derive(Default)]
pub struct StaticModuleResolver {
    exports: HashMap<(String, String), Value>,
}

impl StaticModuleResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the live value for a module export.
    pub fn register(
        &mut self,
        module_id: impl Into<String>,
        export_name: impl Into<String>,
        value: Value,
    ) {
        self.exports
            .insert((module_id.into(), export_name.into()), value);
    }
}

impl ModuleResolver for StaticModuleResolver {
    fn resolve(&self, module_id: &str, export_name: &str) -> ModuleLoad {
        match self
            .exports
            .get(&(module_id.to_string(), export_name.to_string()))
        {
            Some(value) => ModuleLoad::Ready(value.clone()),
            None => ModuleLoad::Failed(ErrorValue::new(format!(
                "unknown module export {module_id}#{export_name}"
            ))),
        }
    }
}
