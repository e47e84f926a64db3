use bytes::{BufMut, BytesMut};

use crate::checksum::checksum;
use crate::config::FrameConfig;
use crate::error::{FrameError, Result};

/// Bytes a frame adds around its payload: START + END + checksum.
pub const FRAME_OVERHEAD: usize = 3;

/// Encode one frame into the wire format.
///
/// Wire format:
/// ```text
/// ┌──────────┬──────────────────┬──────────┬──────────────┐
/// │ START    │ Payload          │ END      │ Checksum     │
/// │ (1B)     │ (N bytes)        │ (1B)     │ (1B, XOR)    │
/// └──────────┴──────────────────┴──────────┴──────────────┘
/// ```
pub fn encode_frame(config: &FrameConfig, payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    if payload.len() != config.payload_len() {
        return Err(FrameError::PayloadLength {
            expected: config.payload_len(),
            actual: payload.len(),
        });
    }
    dst.reserve(config.wire_size());
    dst.put_u8(config.start());
    dst.put_slice(payload);
    dst.put_u8(config.end());
    dst.put_u8(checksum(payload));
    Ok(())
}
