use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Result, RowError};
use crate::tag::RowTag;

/// Row header: magic (2) + id (4) + tag (1) + length (4) = 11 bytes.
pub const HEADER_SIZE: usize = 11;

/// Magic bytes: "FW" (0x46 0x57).
pub const MAGIC: [u8; 2] = [0x46, 0x57];

/// Default maximum payload size: 16 MiB.
pub const DEFAULT_MAX_PAYLOAD: usize = 16 * 1024 * 1024;

/// One self-framed unit of the wire stream.
///
/// A row identifies a value by id and tag. Rows are immutable once emitted;
/// the only legal reuse of an id is a `Pending` declaration followed by its
/// `Resolve` or `Reject`.
#[derive(Debug, Clone)]
pub struct Row {
    /// Session-unique id, assigned by the encoder at emission.
    pub id: u32,
    /// How the payload is interpreted.
    pub tag: RowTag,
    /// The row payload.
    pub payload: Bytes,
}

impl Row {
    /// Create a new row.
    pub fn new(id: u32, tag: RowTag, payload: impl Into<Bytes>) -> Self {
        Self {
            id,
            tag,
            payload: payload.into(),
        }
    }

    /// The total wire size of this row (header + payload).
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }
}

/// Encode a row into the wire format.
///
/// Wire format:
/// ```text
/// ┌────────────┬───────────┬──────────┬────────────┬─────────────────┐
/// │ Magic (2B) │ Id (4B LE)│ Tag (1B) │ Len (4B LE)│ Payload (Len B) │
/// │ 0x46 0x57  │           │ ASCII    │            │                 │
/// └────────────┴───────────┴──────────┴────────────┴─────────────────┘
/// ```
pub fn encode_row(id: u32, tag: RowTag, payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    if payload.len() > u32::MAX as usize {
        return Err(RowError::PayloadTooLarge {
            size: payload.len(),
            max: u32::MAX as usize,
        });
    }
    dst.reserve(HEADER_SIZE + payload.len());
    dst.put_slice(&MAGIC);
    dst.put_u32_le(id);
    dst.put_u8(tag.as_u8());
    dst.put_u32_le(payload.len() as u32);
    dst.put_slice(payload);
    Ok(())
}

/// Decode a row from a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete row yet.
/// On success, consumes exactly the row's bytes from the buffer.
pub fn decode_row(src: &mut BytesMut, max_payload: usize) -> Result<Option<Row>> {
    if src.len() < HEADER_SIZE {
        return Ok(None); // Need more data
    }

    // Check magic
    if src[0..2] != MAGIC {
        return Err(RowError::InvalidMagic);
    }

    let id = u32::from_le_bytes(src[2..6].try_into().expect("4 header bytes"));
    let tag = RowTag::from_u8(src[6]).ok_or(RowError::UnknownTag(src[6]))?;
    let payload_len = u32::from_le_bytes(src[7..11].try_into().expect("4 header bytes")) as usize;

    if payload_len > max_payload {
        return Err(RowError::PayloadTooLarge {
            size: payload_len,
            max: max_payload,
        });
    }

    let total = HEADER_SIZE + payload_len;
    if src.len() < total {
        return Ok(None); // Need more data
    }

    src.advance(HEADER_SIZE);
    let payload = src.split_to(payload_len).freeze();

    Ok(Some(Row { id, tag, payload }))
}

/// Configuration for the row codec.
#[derive(Debug, Clone)]
pub struct RowConfig {
    /// Maximum payload size in bytes. Default: 16 MiB.
    pub max_payload_size: usize,
}

impl Default for RowConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_roundtrip() {
        let mut buf = BytesMut::new();
        let payload = br#"{"greeting":"hello"}"#;

        encode_row(0, RowTag::Json, payload, &mut buf).unwrap();
        assert_eq!(buf.len(), HEADER_SIZE + payload.len());

        let row = decode_row(&mut buf, DEFAULT_MAX_PAYLOAD).unwrap().unwrap();
        assert_eq!(row.id, 0);
        assert_eq!(row.tag, RowTag::Json);
        assert_eq!(row.payload.as_ref(), payload);
        assert!(buf.is_empty());
    }

    #[test]
    fn decode_incomplete_header() {
        let mut buf = BytesMut::from(&[0x46, 0x57, 0x01][..]);
        let result = decode_row(&mut buf, DEFAULT_MAX_PAYLOAD).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn decode_incomplete_payload() {
        let mut buf = BytesMut::new();
        encode_row(3, RowTag::Buffer, b"binary bytes", &mut buf).unwrap();
        buf.truncate(HEADER_SIZE + 4); // Truncate payload

        let result = decode_row(&mut buf, DEFAULT_MAX_PAYLOAD).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn decode_invalid_magic() {
        let mut buf = BytesMut::from(&[0xFF; HEADER_SIZE][..]);
        let result = decode_row(&mut buf, DEFAULT_MAX_PAYLOAD);
        assert!(matches!(result, Err(RowError::InvalidMagic)));
    }

    #[test]
    fn decode_unknown_tag() {
        let mut buf = BytesMut::new();
        buf.put_slice(&MAGIC);
        buf.put_u32_le(1);
        buf.put_u8(b'Z');
        buf.put_u32_le(0);

        let result = decode_row(&mut buf, DEFAULT_MAX_PAYLOAD);
        assert!(matches!(result, Err(RowError::UnknownTag(b'Z'))));
    }

    #[test]
    fn decode_payload_too_large() {
        let mut buf = BytesMut::new();
        buf.put_slice(&MAGIC);
        buf.put_u32_le(1);
        buf.put_u8(RowTag::Buffer.as_u8());
        buf.put_u32_le(1024 * 1024 * 32); // 32 MiB

        let result = decode_row(&mut buf, DEFAULT_MAX_PAYLOAD);
        assert!(matches!(result, Err(RowError::PayloadTooLarge { .. })));
    }

    #[test]
    fn multiple_rows() {
        let mut buf = BytesMut::new();
        encode_row(1, RowTag::Buffer, b"first", &mut buf).unwrap();
        encode_row(0, RowTag::Json, br#""$1""#, &mut buf).unwrap();

        let r1 = decode_row(&mut buf, DEFAULT_MAX_PAYLOAD).unwrap().unwrap();
        assert_eq!((r1.id, r1.tag), (1, RowTag::Buffer));
        assert_eq!(r1.payload.as_ref(), b"first");

        let r2 = decode_row(&mut buf, DEFAULT_MAX_PAYLOAD).unwrap().unwrap();
        assert_eq!((r2.id, r2.tag), (0, RowTag::Json));
        assert_eq!(r2.payload.as_ref(), br#""$1""#);

        assert!(buf.is_empty());
    }

    #[test]
    fn empty_payload() {
        let mut buf = BytesMut::new();
        encode_row(7, RowTag::Pending, b"", &mut buf).unwrap();

        let row = decode_row(&mut buf, DEFAULT_MAX_PAYLOAD).unwrap().unwrap();
        assert_eq!(row.id, 7);
        assert_eq!(row.tag, RowTag::Pending);
        assert!(row.payload.is_empty());
    }

    #[test]
    fn row_wire_size() {
        let row = Row::new(2, RowTag::Json, Bytes::from_static(b"null"));
        assert_eq!(row.wire_size(), HEADER_SIZE + 4);
    }
}
