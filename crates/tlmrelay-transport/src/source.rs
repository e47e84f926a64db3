use std::io::{Cursor, ErrorKind, Read};
use std::time::Duration;

use bytes::{Buf, BytesMut};

use crate::error::{Result, TransportError};

const INITIAL_BUFFER_CAPACITY: usize = 1024;
const READ_CHUNK_SIZE: usize = 256;

/// Supplies the next byte from a transport.
///
/// `Ok(None)` means the timeout elapsed with no data; callers simply retry.
/// Any `Err` is fatal for the source.
pub trait ByteSource {
    /// Read one byte, waiting at most `timeout` for it to arrive.
    fn read_one(&mut self, timeout: Duration) -> Result<Option<u8>>;
}

impl<S: ByteSource + ?Sized> ByteSource for Box<S> {
    fn read_one(&mut self, timeout: Duration) -> Result<Option<u8>> {
        (**self).read_one(timeout)
    }
}

/// A reader whose blocking read can be bounded by a timeout.
///
/// Readers that never block (files, in-memory buffers) implement this as a no-op.
pub trait TimeoutRead: Read {
    /// Apply `timeout` to subsequent reads.
    fn apply_read_timeout(&mut self, timeout: Duration) -> std::io::Result<()>;
}

#[cfg(unix)]
impl TimeoutRead for std::os::unix::net::UnixStream {
    fn apply_read_timeout(&mut self, timeout: Duration) -> std::io::Result<()> {
        self.set_read_timeout(Some(timeout))
    }
}

#[cfg(feature = "serial")]
impl TimeoutRead for Box<dyn serialport::SerialPort> {
    fn apply_read_timeout(&mut self, timeout: Duration) -> std::io::Result<()> {
        self.set_timeout(timeout).map_err(Into::into)
    }
}

impl TimeoutRead for std::fs::File {
    fn apply_read_timeout(&mut self, _timeout: Duration) -> std::io::Result<()> {
        Ok(())
    }
}

impl<T: AsRef<[u8]>> TimeoutRead for Cursor<T> {
    fn apply_read_timeout(&mut self, _timeout: Duration) -> std::io::Result<()> {
        Ok(())
    }
}

impl TimeoutRead for &[u8] {
    fn apply_read_timeout(&mut self, _timeout: Duration) -> std::io::Result<()> {
        Ok(())
    }
}

/// Adapts any [`TimeoutRead`] into a [`ByteSource`].
///
/// Reads arrive in chunks and are handed out one byte per call, so a slow
/// serial link costs one syscall per chunk rather than per byte.
pub struct ByteStream<R> {
    inner: R,
    buf: BytesMut,
    applied_timeout: Option<Duration>,
}

impl<R: TimeoutRead> ByteStream<R> {
    /// Wrap a reader.
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            applied_timeout: None,
        }
    }

    /// Number of bytes read from the transport but not yet handed out.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Borrow the underlying reader.
    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    /// Mutably borrow the underlying reader.
    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    /// Consume the stream and return the inner reader. Buffered bytes are lost.
    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: TimeoutRead> ByteSource for ByteStream<R> {
    fn read_one(&mut self, timeout: Duration) -> Result<Option<u8>> {
        if !self.buf.is_empty() {
            let byte = self.buf[0];
            self.buf.advance(1);
            return Ok(Some(byte));
        }

        if self.applied_timeout != Some(timeout) {
            self.inner.apply_read_timeout(timeout)?;
            self.applied_timeout = Some(timeout);
        }

        let mut chunk = [0u8; READ_CHUNK_SIZE];
        loop {
            match self.inner.read(&mut chunk) {
                Ok(0) => return Err(TransportError::Closed),
                Ok(n) => {
                    self.buf.extend_from_slice(&chunk[1..n]);
                    return Ok(Some(chunk[0]));
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if matches!(err.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => {
                    return Ok(None);
                }
                Err(err) => return Err(TransportError::Io(err)),
            }
        }
    }
}

impl<R> std::fmt::Debug for ByteStream<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ByteStream")
            .field("buffered", &self.buf.len())
            .field("applied_timeout", &self.applied_timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_millis(10);

    #[test]
    fn yields_bytes_in_order_then_closed() {
        let mut source = ByteStream::new(Cursor::new(vec![1u8, 2, 3]));

        assert_eq!(source.read_one(TIMEOUT).unwrap(), Some(1));
        assert_eq!(source.buffered(), 2);
        assert_eq!(source.read_one(TIMEOUT).unwrap(), Some(2));
        assert_eq!(source.read_one(TIMEOUT).unwrap(), Some(3));

        let err = source.read_one(TIMEOUT).unwrap_err();
        assert!(err.is_closed());
    }

    #[test]
    fn chunk_larger_than_read_size_is_fully_delivered() {
        let data: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();
        let mut source = ByteStream::new(Cursor::new(data.clone()));

        let mut out = Vec::new();
        while let Ok(Some(byte)) = source.read_one(TIMEOUT) {
            out.push(byte);
        }
        assert_eq!(out, data);
    }

    struct Scripted {
        steps: Vec<std::io::Result<Vec<u8>>>,
        timeouts_applied: Vec<Duration>,
    }

    impl Read for Scripted {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.steps.is_empty() {
                return Ok(0);
            }
            match self.steps.remove(0) {
                Ok(bytes) => {
                    buf[..bytes.len()].copy_from_slice(&bytes);
                    Ok(bytes.len())
                }
                Err(err) => Err(err),
            }
        }
    }

    impl TimeoutRead for Scripted {
        fn apply_read_timeout(&mut self, timeout: Duration) -> std::io::Result<()> {
            self.timeouts_applied.push(timeout);
            Ok(())
        }
    }

    #[test]
    fn timeout_is_not_an_error() {
        let reader = Scripted {
            steps: vec![
                Err(std::io::Error::from(ErrorKind::TimedOut)),
                Err(std::io::Error::from(ErrorKind::WouldBlock)),
                Ok(vec![0xAB]),
            ],
            timeouts_applied: Vec::new(),
        };
        let mut source = ByteStream::new(reader);

        assert_eq!(source.read_one(TIMEOUT).unwrap(), None);
        assert_eq!(source.read_one(TIMEOUT).unwrap(), None);
        assert_eq!(source.read_one(TIMEOUT).unwrap(), Some(0xAB));
    }

    #[test]
    fn interrupted_read_retries() {
        let reader = Scripted {
            steps: vec![
                Err(std::io::Error::from(ErrorKind::Interrupted)),
                Ok(vec![7]),
            ],
            timeouts_applied: Vec::new(),
        };
        let mut source = ByteStream::new(reader);
        assert_eq!(source.read_one(TIMEOUT).unwrap(), Some(7));
    }

    #[test]
    fn hard_io_error_is_fatal() {
        let reader = Scripted {
            steps: vec![Err(std::io::Error::from(ErrorKind::BrokenPipe))],
            timeouts_applied: Vec::new(),
        };
        let mut source = ByteStream::new(reader);
        let err = source.read_one(TIMEOUT).unwrap_err();
        assert!(matches!(err, TransportError::Io(e) if e.kind() == ErrorKind::BrokenPipe));
    }

    #[test]
    fn timeout_applied_only_when_changed() {
        let reader = Scripted {
            steps: vec![
                Err(std::io::Error::from(ErrorKind::TimedOut)),
                Err(std::io::Error::from(ErrorKind::TimedOut)),
                Err(std::io::Error::from(ErrorKind::TimedOut)),
            ],
            timeouts_applied: Vec::new(),
        };
        let mut source = ByteStream::new(reader);

        source.read_one(TIMEOUT).unwrap();
        source.read_one(TIMEOUT).unwrap();
        source.read_one(Duration::from_millis(50)).unwrap();

        assert_eq!(
            source.get_ref().timeouts_applied,
            vec![TIMEOUT, Duration::from_millis(50)]
        );
    }

    #[test]
    fn boxed_source_delegates() {
        let mut source: Box<dyn ByteSource> = Box::new(ByteStream::new(&[9u8][..]));
        assert_eq!(source.read_one(TIMEOUT).unwrap(), Some(9));
        assert!(source.read_one(TIMEOUT).unwrap_err().is_closed());
    }

    #[test]
    #[cfg(unix)]
    fn unix_stream_times_out_without_data() {
        let (left, _right) = std::os::unix::net::UnixStream::pair().unwrap();
        let mut source = ByteStream::new(left);
        assert_eq!(source.read_one(TIMEOUT).unwrap(), None);
    }
}
