//! Self-delimited row framing for the flightwire protocol.
//!
//! A row is the atomic wire unit: an id, a type tag, and a payload. Every
//! row is framed with:
//! - A 2-byte magic number ("FW") for stream synchronization
//! - A 4-byte little-endian row id
//! - A 1-byte type tag selecting how the payload is interpreted
//! - A 4-byte little-endian payload length
//!
//! Parsing one row never looks past its own framing boundary, which is what
//! lets the decoder process partial network reads incrementally.

pub mod codec;
pub mod error;
pub mod reader;
pub mod tag;
pub mod writer;

pub use codec::{decode_row, encode_row, Row, RowConfig, DEFAULT_MAX_PAYLOAD, HEADER_SIZE};
pub use error::{Result, RowError};
pub use reader::RowReader;
pub use tag::RowTag;
pub use writer::RowWriter;
