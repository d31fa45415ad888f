/// Errors that can occur while encoding a value graph.
#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    /// The value at `path` has no wire representation, no module mapping,
    /// and no temporary-reference set was active.
    #[error("unsupported value at {path} (no module mapping or temporary-reference set)")]
    Unsupported { path: String },

    /// A container references itself with no settle point in between.
    #[error("synchronous reference cycle at {path}")]
    Cycle { path: String },

    /// The drain-once iterator at `path` was already exhausted.
    #[error("iterator at {path} was already drained")]
    IteratorDrained { path: String },

    /// A write was attempted after the session ended.
    #[error("encode session is closed")]
    Closed,

    /// The session's cancellation signal fired.
    #[error("encode session was cancelled")]
    Cancelled,

    /// Payload serialization failed.
    #[error("payload serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, EncodeError>;
