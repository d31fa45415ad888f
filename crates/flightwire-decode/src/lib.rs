//! Incremental decode sessions for the flightwire protocol.
//!
//! A [`Response`] consumes the row stream an encode session produced and
//! reconstructs an equivalent value graph as rows arrive. Values that
//! transitively reference only arrived rows are observable immediately;
//! positions blocked on rows still in flight carry placeholders that are
//! spliced in place when the missing chunk settles. Failures scoped to one
//! value reject that chunk only; protocol violations poison the session.

mod chunk;
pub mod error;
mod parse;
pub mod resolver;
pub mod response;

pub use error::{DecodeError, Result};
pub use resolver::{ModuleLoad, ModuleResolver, StaticModuleResolver};
pub use response::{DecodeOptions, Response};
