use std::io::{ErrorKind, Write};

use bytes::BytesMut;

use crate::codec::{encode_row, Row, RowConfig};
use crate::error::{Result, RowError};
use crate::tag::RowTag;

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;

/// Writes complete rows to any `Write` stream.
pub struct RowWriter<T> {
    inner: T,
    buf: BytesMut,
    config: RowConfig,
}

impl<T: Write> RowWriter<T> {
    /// Create a new row writer with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, RowConfig::default())
    }

    /// Create a new row writer with explicit configuration.
    pub fn with_config(inner: T, config: RowConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        }
    }

    /// Write a complete row (blocking).
    pub fn write_row(&mut self, row: &Row) -> Result<()> {
        self.send(row.id, row.tag, row.payload.as_ref())
    }

    /// Encode and send one row.
    pub fn send(&mut self, id: u32, tag: RowTag, payload: &[u8]) -> Result<()> {
        if payload.len() > self.config.max_payload_size {
            return Err(RowError::PayloadTooLarge {
                size: payload.len(),
                max: self.config.max_payload_size,
            });
        }

        self.buf.clear();
        encode_row(id, tag, payload, &mut self.buf)?;

        let mut offset = 0usize;
        while offset < self.buf.len() {
            match self.inner.write(&self.buf[offset..]) {
                Ok(0) => return Err(RowError::ConnectionClosed),
                Ok(n) => offset += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => continue,
                Err(err) => return Err(RowError::Io(err)),
            }
        }

        self.flush()
    }

    /// Flush the underlying stream.
    pub fn flush(&mut self) -> Result<()> {
        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => continue,
                Err(err) => return Err(RowError::Io(err)),
            }
        }
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the writer and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Current row writer configuration.
    pub fn config(&self) -> &RowConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use bytes::BytesMut;

    use super::*;
    use crate::codec::decode_row;

    #[test]
    fn write_single_row() {
        let cursor = Cursor::new(Vec::<u8>::new());
        let mut writer = RowWriter::new(cursor);

        writer.send(0, RowTag::Json, b"42").unwrap();

        let inner = writer.into_inner();
        let mut wire = BytesMut::from(inner.into_inner().as_slice());
        let row = decode_row(&mut wire, usize::MAX).unwrap().unwrap();
        assert_eq!((row.id, row.tag), (0, RowTag::Json));
        assert_eq!(row.payload.as_ref(), b"42");
    }

    #[test]
    fn write_multiple_rows() {
        let cursor = Cursor::new(Vec::<u8>::new());
        let mut writer = RowWriter::new(cursor);

        writer.send(1, RowTag::Buffer, b"bytes").unwrap();
        writer.send(2, RowTag::Pending, b"").unwrap();
        writer.send(0, RowTag::Json, br#"["$1","$@2"]"#).unwrap();

        let inner = writer.into_inner();
        let mut wire = BytesMut::from(inner.into_inner().as_slice());

        let r1 = decode_row(&mut wire, usize::MAX).unwrap().unwrap();
        let r2 = decode_row(&mut wire, usize::MAX).unwrap().unwrap();
        let r3 = decode_row(&mut wire, usize::MAX).unwrap().unwrap();

        assert_eq!((r1.id, r1.tag), (1, RowTag::Buffer));
        assert_eq!((r2.id, r2.tag), (2, RowTag::Pending));
        assert_eq!((r3.id, r3.tag), (0, RowTag::Json));
        assert!(wire.is_empty());
    }

    #[test]
    fn payload_too_large_rejected() {
        let cfg = RowConfig {
            max_payload_size: 4,
        };
        let cursor = Cursor::new(Vec::<u8>::new());
        let mut writer = RowWriter::with_config(cursor, cfg);

        let err = writer.send(1, RowTag::Buffer, b"oversized").unwrap_err();
        assert!(matches!(err, RowError::PayloadTooLarge { .. }));
    }

    #[test]
    fn write_row_method() {
        let cursor = Cursor::new(Vec::<u8>::new());
        let mut writer = RowWriter::new(cursor);
        let row = Row::new(2, RowTag::Error, br#"{"message":"boom"}"#.as_slice());

        writer.write_row(&row).unwrap();

        let inner = writer.into_inner();
        let mut wire = BytesMut::from(inner.into_inner().as_slice());
        let decoded = decode_row(&mut wire, usize::MAX).unwrap().unwrap();

        assert_eq!((decoded.id, decoded.tag), (2, RowTag::Error));
        assert_eq!(decoded.payload.as_ref(), br#"{"message":"boom"}"#);
    }

    #[test]
    fn connection_closed_when_write_returns_zero() {
        let mut writer = RowWriter::new(ZeroWriter);
        let err = writer.send(1, RowTag::Json, b"x").unwrap_err();
        assert!(matches!(err, RowError::ConnectionClosed));
    }

    #[test]
    fn handles_interrupted_write_and_flush() {
        let writer_impl = InterruptedWriteThenFlush {
            wrote_once: false,
            flush_interrupted: false,
            data: Vec::new(),
        };

        let mut writer = RowWriter::new(writer_impl);
        writer.send(5, RowTag::Json, b"\"retry\"").unwrap();

        let inner = writer.into_inner();
        assert!(!inner.data.is_empty());
    }

    #[test]
    fn written_bytes_read_back() {
        let cursor = Cursor::new(Vec::<u8>::new());
        let mut writer = RowWriter::new(cursor);

        writer.send(3, RowTag::Json, b"\"z\"").unwrap();

        let wire = writer.into_inner().into_inner();
        let mut framed = crate::reader::RowReader::new(Cursor::new(wire));
        let row = framed.read_row().unwrap();
        assert_eq!((row.id, row.tag), (3, RowTag::Json));
        assert_eq!(row.payload.as_ref(), b"\"z\"");
    }

    struct ZeroWriter;

    impl Write for ZeroWriter {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Ok(0)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    struct InterruptedWriteThenFlush {
        wrote_once: bool,
        flush_interrupted: bool,
        data: Vec<u8>,
    }

    impl Write for InterruptedWriteThenFlush {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            if !self.wrote_once {
                self.wrote_once = true;
                return Err(std::io::Error::from(ErrorKind::Interrupted));
            }
            self.data.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            if !self.flush_interrupted {
                self.flush_interrupted = true;
                return Err(std::io::Error::from(ErrorKind::Interrupted));
            }
            Ok(())
        }
    }
}
