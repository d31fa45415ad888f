use serde::{Deserialize, Serialize};

/// A wire token denoting code the consumer resolves and loads itself
/// instead of receiving as data.
///
/// The producer never serializes the referenced functionality; it emits the
/// module id, the exported name within it, and optional chunk hints the
/// consumer's loader may prefetch.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModuleReference {
    #[serde(rename = "id")]
    pub module_id: String,
    #[serde(rename = "name")]
    pub export_name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub chunks: Vec<String>,
}

impl ModuleReference {
    /// Create a module reference without chunk hints.
    pub fn new(module_id: impl Into<String>, export_name: impl Into<String>) -> Self {
        Self {
            module_id: module_id.into(),
            export_name: export_name.into(),
            chunks: Vec::new(),
        }
    }

    /// Attach loader chunk hints.
    pub fn with_chunks(mut self, chunks: Vec<String>) -> Self {
        self.chunks = chunks;
        self
    }
}
