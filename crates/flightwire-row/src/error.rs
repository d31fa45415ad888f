/// Errors that can occur during row encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum RowError {
    /// The row header contains an invalid magic number.
    #[error("invalid row magic (expected 0x4657 \"FW\")")]
    InvalidMagic,

    /// The row header carries a tag byte outside the closed tag set.
    #[error("unknown row tag byte 0x{0:02x}")]
    UnknownTag(u8),

    /// The payload exceeds the configured maximum size.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// An I/O error occurred while reading or writing rows.
    #[error("row I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection was closed before a complete row was received.
    #[error("connection closed (incomplete row)")]
    ConnectionClosed,
}

pub type Result<T> = std::result::Result<T, RowError>;
