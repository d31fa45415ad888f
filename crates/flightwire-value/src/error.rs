use std::fmt;

use serde::{Deserialize, Serialize};

/// Message shown in place of redacted producer-side detail.
pub const REDACTED_MESSAGE: &str =
    "an error occurred on the producer side (details redacted in this configuration)";

/// An error object carried over the wire.
///
/// This is a *value*: decoded graphs may contain errors as data, and a
/// rejected promise settles with one. The optional stack and digest are
/// diagnostic detail that production-style configurations strip via
/// [`ErrorValue::redacted`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorValue {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

impl ErrorValue {
    /// Create an error with a bare message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stack: None,
            digest: None,
        }
    }

    /// Attach a stack trace.
    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    /// Attach an opaque digest for log correlation.
    pub fn with_digest(mut self, digest: impl Into<String>) -> Self {
        self.digest = Some(digest.into());
        self
    }

    /// The condition every pending chunk errors with when the transport
    /// closes before the stream completed.
    pub fn connection_closed() -> Self {
        Self::new("connection closed before all referenced values resolved")
    }

    /// True if this error carries the connection-closed condition.
    pub fn is_connection_closed(&self) -> bool {
        self.message == Self::connection_closed().message
    }

    /// Production-safe projection: keeps the digest for correlation,
    /// replaces message and stack with a generic marker.
    pub fn redacted(&self) -> Self {
        Self {
            message: REDACTED_MESSAGE.to_string(),
            stack: None,
            digest: self.digest.clone(),
        }
    }
}

impl fmt::Display for ErrorValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(digest) = &self.digest {
            write!(f, " (digest: {digest})")?;
        }
        Ok(())
    }
}

impl std::error::Error for ErrorValue {}
