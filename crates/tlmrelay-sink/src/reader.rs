use std::io::{ErrorKind, Read};

use bytes::BytesMut;

use crate::codec::{decode_envelope, Envelope, DEFAULT_MAX_PAYLOAD};
use crate::error::{Result, SinkError};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Reads complete bus envelopes from any `Read` stream.
///
/// Handles partial reads internally; callers always get whole envelopes.
pub struct BusReader<R> {
    inner: R,
    buf: BytesMut,
    max_payload_size: usize,
}

impl<R: Read> BusReader<R> {
    /// Create a reader with the default payload limit.
    pub fn new(inner: R) -> Self {
        Self::with_max_payload(inner, DEFAULT_MAX_PAYLOAD)
    }

    /// Create a reader with an explicit payload limit.
    pub fn with_max_payload(inner: R, max_payload_size: usize) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            max_payload_size,
        }
    }

    /// Read the next complete envelope (blocking).
    ///
    /// Returns `Ok(None)` on a clean end-of-stream between envelopes and
    /// `Err(SinkError::ConnectionClosed)` when the stream ends mid-envelope.
    pub fn read_envelope(&mut self) -> Result<Option<Envelope>> {
        loop {
            if let Some(envelope) = decode_envelope(&mut self.buf, self.max_payload_size)? {
                return Ok(Some(envelope));
            }

            let mut chunk = [0u8; READ_CHUNK_SIZE];
            let read = match self.inner.read(&mut chunk) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(SinkError::Io(err)),
            };

            if read == 0 {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                return Err(SinkError::ConnectionClosed);
            }

            self.buf.extend_from_slice(&chunk[..read]);
        }
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> Iterator for BusReader<R> {
    type Item = Result<Envelope>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_envelope().transpose()
    }
}
