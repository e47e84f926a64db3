use crate::codec::FRAME_OVERHEAD;
use crate::error::{FrameError, Result};

/// START marker used by the reference telemetry link.
pub const DEFAULT_START: u8 = 0xFF;

/// END marker used by the reference telemetry link.
pub const DEFAULT_END: u8 = 0xEE;

/// Payload length used by the reference telemetry link.
pub const DEFAULT_PAYLOAD_LEN: usize = 160;

/// Frame shape, fixed for the lifetime of a synchronizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameConfig {
    start: u8,
    end: u8,
    payload_len: usize,
}

impl FrameConfig {
    /// Create a frame shape. `payload_len` must be at least 1.
    pub fn new(start: u8, end: u8, payload_len: usize) -> Result<Self> {
        if payload_len == 0 {
            return Err(FrameError::ZeroPayloadLength);
        }
        Ok(Self {
            start,
            end,
            payload_len,
        })
    }

    /// START marker byte.
    pub fn start(&self) -> u8 {
        self.start
    }

    /// END marker byte.
    pub fn end(&self) -> u8 {
        self.end
    }

    /// Payload bytes per frame.
    pub fn payload_len(&self) -> usize {
        self.payload_len
    }

    /// Total bytes one frame occupies on the wire.
    pub fn wire_size(&self) -> usize {
        self.payload_len + FRAME_OVERHEAD
    }
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            start: DEFAULT_START,
            end: DEFAULT_END,
            payload_len: DEFAULT_PAYLOAD_LEN,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_reference_link() {
        let config = FrameConfig::default();
        assert_eq!(config.start(), 0xFF);
        assert_eq!(config.end(), 0xEE);
        assert_eq!(config.payload_len(), 160);
        assert_eq!(config.wire_size(), 163);
    }

    #[test]
    fn zero_length_rejected() {
        assert_eq!(
            FrameConfig::new(0x7E, 0x7F, 0),
            Err(FrameError::ZeroPayloadLength)
        );
    }

    #[test]
    fn single_byte_payload_allowed() {
        let config = FrameConfig::new(0x01, 0x02, 1).unwrap();
        assert_eq!(config.wire_size(), 4);
    }
}
