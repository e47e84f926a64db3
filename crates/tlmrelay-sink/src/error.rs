/// Errors that can occur while delivering packets or decoding bus envelopes.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// The envelope header contains an invalid magic number.
    #[error("invalid envelope magic (expected 0x5452 \"TR\")")]
    InvalidMagic,

    /// The payload exceeds the configured maximum size.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// The topic does not fit the 16-bit length field.
    #[error("topic too long ({len} bytes, max {max})")]
    TopicTooLong { len: usize, max: usize },

    /// The topic is empty or not valid UTF-8.
    #[error("invalid topic: {0}")]
    InvalidTopic(String),

    /// An I/O error occurred while reading or writing envelopes.
    #[error("bus I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Could not reach the bus.
    #[error("bus transport error: {0}")]
    Transport(#[from] tlmrelay_transport::TransportError),

    /// A write did not complete within the configured write timeout.
    #[error("bus write timed out")]
    WriteTimeout,

    /// The broker client rejected a request (queue full or client stopped).
    #[error("broker request failed: {0}")]
    Broker(String),

    /// The peer closed the connection before a complete envelope was transferred.
    #[error("connection closed (incomplete envelope)")]
    ConnectionClosed,

    /// The sink was closed and accepts no more packets.
    #[error("sink closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, SinkError>;
