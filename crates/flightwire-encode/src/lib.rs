//! Encode sessions for the flightwire protocol.
//!
//! A session walks a value graph depth-first, assigns row ids, deduplicates
//! repeated references through an identity arena, and emits rows to an
//! internal queue the caller drains toward its transport. Encountering a
//! pending asynchronous value emits a placeholder row immediately so the
//! consumer can proceed; a one-shot continuation emits the follow-up row
//! when the value settles.

pub mod cancel;
pub mod classify;
pub mod error;
pub mod fragment;
pub mod module_map;
pub mod path;
pub mod session;

pub use cancel::{CancelSignal, CancelTrigger};
pub use classify::{classify, WireClass};
pub use error::{EncodeError, Result};
pub use module_map::{ModuleMap, StaticModuleMap};
pub use session::{EncodeOptions, EncodeSession, ErrorDetail, DEFAULT_MAX_LAZY_RETRIES};
