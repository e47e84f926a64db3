/// Errors that end a relay run.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// The byte source failed.
    #[error("transport error: {0}")]
    Transport(#[from] tlmrelay_transport::TransportError),

    /// The packet sink rejected a packet or failed to close.
    #[error("publish failed: {0}")]
    Publish(#[from] tlmrelay_sink::SinkError),

    /// The ingest thread could not be started.
    #[error("failed to spawn ingest thread: {0}")]
    Spawn(std::io::Error),

    /// The ingest thread panicked.
    #[error("ingest thread panicked")]
    IngestPanicked,
}

impl RelayError {
    /// True when the error came from the byte source.
    pub fn is_transport(&self) -> bool {
        matches!(self, RelayError::Transport(_))
    }
}

pub type Result<T> = std::result::Result<T, RelayError>;
