//! Shared value model for the flightwire streaming serialization protocol.
//!
//! Both sides of the wire speak in terms of [`Value`]: a closed universe of
//! supported kinds, from plain JSON-like scalars up to shared binary views,
//! promise-backed values, and opaque live-object handles. Containers are
//! `Rc`-backed so that referential identity survives a round trip, and the
//! decoder can splice late-arriving dependencies in place.

pub mod deferred;
pub mod equal;
pub mod error;
pub mod module;
pub mod temporary;
pub mod value;

pub use deferred::{Deferred, DeferredHandle, SettleResult};
pub use equal::deep_equals;
pub use error::ErrorValue;
pub use module::ModuleReference;
pub use temporary::TemporaryReferences;
pub use value::{
    BlobValue, FormEntry, IteratorValue, LazyPoll, LazySource, OpaqueRef, Value, ViewKind,
    ViewValue,
};
