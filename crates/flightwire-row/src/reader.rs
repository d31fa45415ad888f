use std::io::{ErrorKind, Read};

use bytes::BytesMut;

use crate::codec::{decode_row, Row, RowConfig};
use crate::error::{Result, RowError};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Reads complete rows from any `Read` stream.
///
/// Handles partial reads internally — callers always get complete rows.
pub struct RowReader<T> {
    inner: T,
    buf: BytesMut,
    config: RowConfig,
}

impl<T: Read> RowReader<T> {
    /// Create a new row reader with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, RowConfig::default())
    }

    /// Create a new row reader with explicit configuration.
    pub fn with_config(inner: T, config: RowConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        }
    }

    /// Read the next complete row (blocking).
    ///
    /// Returns `Err(RowError::ConnectionClosed)` when EOF is reached.
    pub fn read_row(&mut self) -> Result<Row> {
        loop {
            if let Some(row) = decode_row(&mut self.buf, self.config.max_payload_size)? {
                return Ok(row);
            }

            let mut chunk = [0u8; READ_CHUNK_SIZE];
            let read = match self.inner.read(&mut chunk) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(RowError::Io(err)),
            };

            if read == 0 {
                return Err(RowError::ConnectionClosed);
            }

            self.buf.extend_from_slice(&chunk[..read]);
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

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Current row reader configuration.
    pub fn config(&self) -> &RowConfig {
        &self.config
    }
}
