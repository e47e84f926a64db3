/// Errors raised while configuring the synchronizer or encoding frames.
///
/// Malformed frames on the wire are not errors: they surface as
/// [`SyncEvent::Rejected`](crate::SyncEvent::Rejected).
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FrameError {
    /// The configured payload length is zero.
    #[error("payload length must be at least 1 byte")]
    ZeroPayloadLength,

    /// A payload handed to the encoder does not match the configured length.
    #[error("payload length mismatch (expected {expected} bytes, got {actual})")]
    PayloadLength { expected: usize, actual: usize },
}

pub type Result<T> = std::result::Result<T, FrameError>;
