use std::io::{ErrorKind, Write};
use std::path::Path;
use std::time::Duration;

use bytes::BytesMut;
use tlmrelay_frame::Packet;
use tracing::{debug, info, warn};

use crate::codec::{check_topic, encode_envelope, DEFAULT_MAX_PAYLOAD, DEFAULT_TOPIC};
use crate::error::{Result, SinkError};
use crate::sink::PacketSink;

const INITIAL_BUFFER_CAPACITY: usize = 1024;

/// Longest a socket publisher waits for a stalled reader before failing.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Publishes packets as bus envelopes on a fixed topic.
pub struct BusPublisher<W> {
    inner: W,
    topic: String,
    buf: BytesMut,
    max_payload_size: usize,
    published: u64,
    closed: bool,
}

#[cfg(unix)]
impl BusPublisher<std::os::unix::net::UnixStream> {
    /// Connect to a bus socket and publish on `topic`, with
    /// [`DEFAULT_WRITE_TIMEOUT`].
    pub fn connect(path: impl AsRef<Path>, topic: impl Into<String>) -> Result<Self> {
        let stream = tlmrelay_transport::BusSocket::connect(path)?;
        let mut publisher = Self::new(stream, topic)?;
        publisher.set_write_timeout(Some(DEFAULT_WRITE_TIMEOUT))?;
        Ok(publisher)
    }

    /// Bound how long one write may wait on a full socket buffer. `None`
    /// waits forever.
    pub fn set_write_timeout(&mut self, timeout: Option<Duration>) -> Result<()> {
        self.inner.set_write_timeout(timeout)?;
        Ok(())
    }
}

impl<W: Write> BusPublisher<W> {
    /// Publish into `inner` on `topic`.
    pub fn new(inner: W, topic: impl Into<String>) -> Result<Self> {
        let topic = topic.into();
        check_topic(&topic)?;
        Ok(Self {
            inner,
            topic,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            max_payload_size: DEFAULT_MAX_PAYLOAD,
            published: 0,
            closed: false,
        })
    }

    /// Publish into `inner` on the default topic.
    pub fn with_default_topic(inner: W) -> Self {
        Self {
            inner,
            topic: DEFAULT_TOPIC.to_string(),
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            max_payload_size: DEFAULT_MAX_PAYLOAD,
            published: 0,
            closed: false,
        }
    }

    /// Encode and send a payload (blocking).
    pub fn send(&mut self, payload: &[u8]) -> Result<()> {
        if self.closed {
            return Err(SinkError::Closed);
        }
        if payload.len() > self.max_payload_size {
            return Err(SinkError::PayloadTooLarge {
                size: payload.len(),
                max: self.max_payload_size,
            });
        }

        self.buf.clear();
        encode_envelope(&self.topic, payload, &mut self.buf)?;

        let mut offset = 0usize;
        while offset < self.buf.len() {
            match self.inner.write(&self.buf[offset..]) {
                Ok(0) => return Err(SinkError::ConnectionClosed),
                Ok(n) => offset += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if is_timeout(&err) => {
                    // A half-written envelope leaves the stream unframed.
                    if offset > 0 {
                        self.closed = true;
                    }
                    warn!(topic = %self.topic, written = offset, "bus write timed out");
                    return Err(SinkError::WriteTimeout);
                }
                Err(err) => return Err(SinkError::Io(err)),
            }
        }

        self.flush()?;
        self.published = self.published.saturating_add(1);
        debug!(topic = %self.topic, size = payload.len(), "published packet");
        Ok(())
    }

    /// Flush the underlying stream.
    pub fn flush(&mut self) -> Result<()> {
        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if is_timeout(&err) => return Err(SinkError::WriteTimeout),
                Err(err) => return Err(SinkError::Io(err)),
            }
        }
    }

    /// Topic every packet is published on.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Packets successfully written so far.
    pub fn published(&self) -> u64 {
        self.published
    }

    /// Update maximum payload size for subsequent sends.
    pub fn set_max_payload_size(&mut self, max_payload_size: usize) {
        self.max_payload_size = max_payload_size;
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    /// Consume the publisher and return the inner stream.
    pub fn into_inner(self) -> W {
        self.inner
    }
}

// Socket write timeouts surface as WouldBlock on Unix.
fn is_timeout(err: &std::io::Error) -> bool {
    matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut)
}

impl<W: Write> PacketSink for BusPublisher<W> {
    fn publish(&mut self, packet: &Packet) -> Result<()> {
        self.send(packet.as_bytes())
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.flush()?;
        info!(topic = %self.topic, published = self.published, "bus publisher closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::codec::{decode_envelope, HEADER_SIZE};

    #[test]
    fn publish_writes_one_envelope_per_packet() {
        let mut publisher = BusPublisher::new(Cursor::new(Vec::<u8>::new()), "car/telemetry").unwrap();

        publisher.publish(&Packet::from(vec![1, 2, 3])).unwrap();
        publisher.publish(&Packet::from(vec![4, 5])).unwrap();
        assert_eq!(publisher.published(), 2);

        let mut wire = BytesMut::from(publisher.into_inner().into_inner().as_slice());
        let first = decode_envelope(&mut wire, DEFAULT_MAX_PAYLOAD).unwrap().unwrap();
        let second = decode_envelope(&mut wire, DEFAULT_MAX_PAYLOAD).unwrap().unwrap();

        assert_eq!(first.topic, "car/telemetry");
        assert_eq!(first.payload.as_ref(), &[1, 2, 3]);
        assert_eq!(second.payload.as_ref(), &[4, 5]);
        assert!(wire.is_empty());
    }

    #[test]
    fn empty_topic_rejected() {
        let result = BusPublisher::new(Cursor::new(Vec::<u8>::new()), "");
        assert!(matches!(result, Err(SinkError::InvalidTopic(_))));
    }

    #[test]
    fn default_topic() {
        let publisher = BusPublisher::with_default_topic(Cursor::new(Vec::<u8>::new()));
        assert_eq!(publisher.topic(), DEFAULT_TOPIC);
    }

    #[test]
    fn oversized_payload_rejected_before_write() {
        let mut publisher = BusPublisher::with_default_topic(Cursor::new(Vec::<u8>::new()));
        publisher.set_max_payload_size(4);

        let err = publisher.send(&[0u8; 5]).unwrap_err();
        assert!(matches!(err, SinkError::PayloadTooLarge { size: 5, max: 4 }));
        assert!(publisher.get_ref().get_ref().is_empty());
    }

    #[test]
    fn publish_after_close_fails() {
        let mut publisher = BusPublisher::with_default_topic(Cursor::new(Vec::<u8>::new()));
        publisher.close().unwrap();
        publisher.close().unwrap();

        let err = publisher.publish(&Packet::from(vec![1])).unwrap_err();
        assert!(matches!(err, SinkError::Closed));
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

    #[test]
    fn zero_length_write_is_connection_closed() {
        let mut publisher = BusPublisher::with_default_topic(ZeroWriter);
        let err = publisher.send(b"x").unwrap_err();
        assert!(matches!(err, SinkError::ConnectionClosed));
        assert_eq!(publisher.published(), 0);
    }

    struct PartialWriter {
        written: Vec<u8>,
        interrupted_once: bool,
    }

    impl Write for PartialWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            if !self.interrupted_once {
                self.interrupted_once = true;
                return Err(std::io::Error::from(ErrorKind::Interrupted));
            }
            let n = buf.len().min(3);
            self.written.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn partial_and_interrupted_writes_complete() {
        let writer = PartialWriter {
            written: Vec::new(),
            interrupted_once: false,
        };
        let mut publisher = BusPublisher::new(writer, "t").unwrap();
        publisher.send(b"payload").unwrap();

        let written = &publisher.get_ref().written;
        assert_eq!(written.len(), HEADER_SIZE + 1 + 7);
    }

    struct StalledWriter;

    impl Write for StalledWriter {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::from(ErrorKind::WouldBlock))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn would_block_is_a_timeout_not_a_retry() {
        let mut publisher = BusPublisher::with_default_topic(StalledWriter);
        let err = publisher.send(b"x").unwrap_err();
        assert!(matches!(err, SinkError::WriteTimeout));
        // Nothing was written, so the stream is still usable.
        assert!(!publisher.closed);
    }

    #[test]
    #[cfg(unix)]
    fn stalled_reader_times_out_and_poisons_stream() {
        let (left, _right) = std::os::unix::net::UnixStream::pair().unwrap();
        let mut publisher = BusPublisher::with_default_topic(left);
        publisher
            .set_write_timeout(Some(Duration::from_millis(50)))
            .unwrap();

        let payload = vec![0u8; 32 * 1024];
        let started = std::time::Instant::now();
        let err = loop {
            match publisher.send(&payload) {
                Ok(()) => assert!(started.elapsed() < Duration::from_secs(10)),
                Err(err) => break err,
            }
        };
        assert!(matches!(err, SinkError::WriteTimeout), "{err:?}");

        if publisher.closed {
            let err = publisher.publish(&Packet::from(vec![1])).unwrap_err();
            assert!(matches!(err, SinkError::Closed));
        }
    }

    #[test]
    #[cfg(unix)]
    fn broken_pipe_surfaces_as_io_error() {
        let (left, right) = std::os::unix::net::UnixStream::pair().unwrap();
        drop(right);
        let mut publisher = BusPublisher::with_default_topic(left);

        let err = publisher.send(&[0u8; 64]).unwrap_err();
        assert!(matches!(err, SinkError::Io(_)));
    }
}
