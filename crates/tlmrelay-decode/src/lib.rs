//! Diagnostic decoding of telemetry payloads.
//!
//! Turns a validated payload into a JSON object using a field layout loaded
//! from a file, optionally checking the result against a JSON Schema. A
//! layout reads either fixed-offset packed fields or the root struct of a
//! Cap'n Proto message.
//!
//! Decoding exists for observability only: a payload that fails to decode
//! is still a valid packet and is still delivered.

mod capnp_struct;
pub mod decoder;
pub mod error;
pub mod layout;

pub use decoder::{DiagnosticDecoder, LayoutDecoder};
pub use error::{DecodeError, Result};
pub use layout::{Encoding, Endian, FieldSpec, FieldType, LayoutLimits, PayloadLayout};
