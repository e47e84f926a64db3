/// Errors that can occur while loading layouts or decoding payloads.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The layout or schema file could not be read.
    #[error("failed to load {0}")]
    LoadFailed(String),

    /// The layout is structurally invalid.
    #[error("invalid layout: {0}")]
    InvalidLayout(String),

    /// The JSON Schema could not be compiled.
    #[error("failed to compile schema: {0}")]
    CompileFailed(String),

    /// The payload is shorter than the layout.
    #[error("payload too short for layout ({actual} bytes, need {needed})")]
    PayloadTooShort { needed: usize, actual: usize },

    /// The decoded value violates the schema.
    #[error("decoded payload failed validation: {0}")]
    ValidationFailed(String),

    /// The payload is not a readable Cap'n Proto message.
    #[error("invalid Cap'n Proto message: {0}")]
    Capnp(#[from] capnp::Error),

    /// Layout or schema is not valid JSON.
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, DecodeError>;
