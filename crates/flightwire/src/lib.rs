//! Streaming serialization for shared, asynchronous object graphs.
//!
//! flightwire turns an arbitrary value graph — including shared references,
//! cycles of pending work, binary buffers, and values that settle later —
//! into a stream of self-framed rows, and reconstructs an equivalent graph
//! incrementally on the consuming side while the stream is still arriving.
//!
//! # Crate Structure
//!
//! - [`value`] — The value model, settle cells, and structural equality
//! - [`row`] — Self-framed row codec with blocking reader/writer helpers
//! - [`encode`] — Producer-side encode sessions
//! - [`decode`] — Consumer-side decode sessions

/// Re-export the value model.
pub mod value {
    pub use flightwire_value::*;
}

/// Re-export row framing types.
pub mod row {
    pub use flightwire_row::*;
}

/// Re-export encode session types.
pub mod encode {
    pub use flightwire_encode::*;
}

/// Re-export decode session types.
pub mod decode {
    pub use flightwire_decode::*;
}
