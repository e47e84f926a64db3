//! Fixed-length frame synchronization for serial telemetry.
//!
//! Every frame on the wire is:
//! - A 1-byte START marker
//! - Exactly N payload bytes
//! - A 1-byte END marker
//! - A 1-byte XOR checksum over the payload
//!
//! [`FrameSynchronizer`] finds those frames inside an unstructured byte
//! stream one byte at a time and hands out validated [`Packet`]s.

pub mod checksum;
pub mod codec;
pub mod config;
pub mod error;
pub mod packet;
pub mod sync;

pub use checksum::checksum;
pub use codec::{encode_frame, FRAME_OVERHEAD};
pub use config::{FrameConfig, DEFAULT_END, DEFAULT_PAYLOAD_LEN, DEFAULT_START};
pub use error::{FrameError, Result};
pub use packet::Packet;
pub use sync::{FrameSynchronizer, RejectReason, SyncEvent, SyncState, SyncStats};
