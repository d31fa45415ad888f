//! The closed set of row type tags.
//!
//! The tag selects how a row's payload is interpreted; the decoder
//! dispatches on it directly, never on structural guessing. Tag bytes are
//! printable ASCII so a captured stream stays greppable.

/// How a row's payload is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RowTag {
    /// JSON payload: inline scalars/containers with `$`-prefixed markers.
    Json = b'J',
    /// An error object (message, optional stack/digest).
    Error = b'E',
    /// Raw bytes of a shared underlying buffer.
    Buffer = b'B',
    /// Typed-view descriptor referencing a buffer row.
    View = b'V',
    /// Ordered map entries (`[[key, value], ..]`).
    Map = b'Q',
    /// Ordered set elements.
    Set = b'W',
    /// Iterator-drained ordered sequence.
    Sequence = b'I',
    /// Ordered multi-part form entries.
    FormData = b'K',
    /// Binary part: meta header (name, content type) plus raw bytes.
    BinaryPart = b'F',
    /// Module reference (module id, exported name, chunk hints).
    Module = b'M',
    /// Declares the id pending; a later row with the same id settles it.
    Pending = b'P',
    /// Resolution payload for a previously pending id.
    Resolve = b'R',
    /// Rejection payload for a previously pending id.
    Reject = b'X',
    /// Terminal cancellation marker; errors everything still pending.
    Abort = b'A',
}

impl RowTag {
    /// Parse a wire tag byte.
    pub fn from_u8(byte: u8) -> Option<Self> {
        Some(match byte {
            b'J' => RowTag::Json,
            b'E' => RowTag::Error,
            b'B' => RowTag::Buffer,
            b'V' => RowTag::View,
            b'Q' => RowTag::Map,
            b'W' => RowTag::Set,
            b'I' => RowTag::Sequence,
            b'K' => RowTag::FormData,
            b'F' => RowTag::BinaryPart,
            b'M' => RowTag::Module,
            b'P' => RowTag::Pending,
            b'R' => RowTag::Resolve,
            b'X' => RowTag::Reject,
            b'A' => RowTag::Abort,
            _ => return None,
        })
    }

    /// The wire byte for this tag.
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Human-readable name, for logs and errors.
    pub fn name(self) -> &'static str {
        match self {
            RowTag::Json => "JSON",
            RowTag::Error => "ERROR",
            RowTag::Buffer => "BUFFER",
            RowTag::View => "VIEW",
            RowTag::Map => "MAP",
            RowTag::Set => "SET",
            RowTag::Sequence => "SEQUENCE",
            RowTag::FormData => "FORM_DATA",
            RowTag::BinaryPart => "BINARY_PART",
            RowTag::Module => "MODULE",
            RowTag::Pending => "PENDING",
            RowTag::Resolve => "RESOLVE",
            RowTag::Reject => "REJECT",
            RowTag::Abort => "ABORT",
        }
    }
}
