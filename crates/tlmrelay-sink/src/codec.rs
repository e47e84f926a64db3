use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Result, SinkError};

/// Envelope header: magic (2) + topic length (2) + payload length (4) = 8 bytes.
pub const HEADER_SIZE: usize = 8;

/// Magic bytes: "TR" (0x54 0x52).
pub const MAGIC: [u8; 2] = [0x54, 0x52];

/// Default maximum payload size: 1 MiB.
pub const DEFAULT_MAX_PAYLOAD: usize = 1024 * 1024;

/// Topic used when none is configured.
pub const DEFAULT_TOPIC: &str = "telemetry";

const MAX_TOPIC_LEN: usize = u16::MAX as usize;

/// A packet addressed to a bus topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Destination topic.
    pub topic: String,
    /// Packet payload.
    pub payload: Bytes,
}

impl Envelope {
    /// Create a new envelope.
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }

    /// The total wire size of this envelope.
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.topic.len() + self.payload.len()
    }
}

/// Encode an envelope into the wire format.
///
/// Wire format:
/// ```text
/// ┌────────────┬───────────┬───────────┬─────────────┬─────────────┐
/// │ Magic (2B) │ Topic len │ Len       │ Topic       │ Payload     │
/// │ 0x54 0x52  │ (2B LE)   │ (4B LE)   │ (UTF-8)     │ (Len bytes) │
/// └────────────┴───────────┴───────────┴─────────────┴─────────────┘
/// ```
pub fn encode_envelope(topic: &str, payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    check_topic(topic)?;
    if payload.len() > u32::MAX as usize {
        return Err(SinkError::PayloadTooLarge {
            size: payload.len(),
            max: u32::MAX as usize,
        });
    }
    dst.reserve(HEADER_SIZE + topic.len() + payload.len());
    dst.put_slice(&MAGIC);
    dst.put_u16_le(topic.len() as u16);
    dst.put_u32_le(payload.len() as u32);
    dst.put_slice(topic.as_bytes());
    dst.put_slice(payload);
    Ok(())
}

/// Decode an envelope from a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete envelope yet.
/// On success, consumes the envelope bytes from the buffer.
pub fn decode_envelope(src: &mut BytesMut, max_payload: usize) -> Result<Option<Envelope>> {
    if src.len() < HEADER_SIZE {
        return Ok(None);
    }

    if src[0..2] != MAGIC {
        return Err(SinkError::InvalidMagic);
    }

    let topic_len = u16::from_le_bytes([src[2], src[3]]) as usize;
    let payload_len = u32::from_le_bytes([src[4], src[5], src[6], src[7]]) as usize;

    if payload_len > max_payload {
        return Err(SinkError::PayloadTooLarge {
            size: payload_len,
            max: max_payload,
        });
    }

    let total = HEADER_SIZE + topic_len + payload_len;
    if src.len() < total {
        return Ok(None);
    }

    src.advance(HEADER_SIZE);
    let topic_bytes = src.split_to(topic_len);
    let payload = src.split_to(payload_len).freeze();

    let topic = String::from_utf8(topic_bytes.to_vec())
        .map_err(|err| SinkError::InvalidTopic(err.to_string()))?;
    check_topic(&topic)?;

    Ok(Some(Envelope { topic, payload }))
}

pub(crate) fn check_topic(topic: &str) -> Result<()> {
    if topic.is_empty() {
        return Err(SinkError::InvalidTopic("topic must not be empty".to_string()));
    }
    if topic.len() > MAX_TOPIC_LEN {
        return Err(SinkError::TopicTooLong {
            len: topic.len(),
            max: MAX_TOPIC_LEN,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_roundtrip() {
        let mut buf = BytesMut::new();
        let payload = [0xAAu8; 160];

        encode_envelope("telemetry", &payload, &mut buf).unwrap();
        assert_eq!(buf.len(), HEADER_SIZE + "telemetry".len() + payload.len());

        let envelope = decode_envelope(&mut buf, DEFAULT_MAX_PAYLOAD)
            .unwrap()
            .unwrap();
        assert_eq!(envelope.topic, "telemetry");
        assert_eq!(envelope.payload.as_ref(), payload.as_slice());
        assert!(buf.is_empty());
    }

    #[test]
    fn header_layout_is_little_endian() {
        let mut buf = BytesMut::new();
        encode_envelope("t", &[1, 2, 3], &mut buf).unwrap();
        assert_eq!(
            buf.as_ref(),
            &[0x54, 0x52, 0x01, 0x00, 0x03, 0x00, 0x00, 0x00, b't', 1, 2, 3]
        );
    }

    #[test]
    fn incomplete_header_needs_more() {
        let mut buf = BytesMut::from(&[0x54, 0x52, 0x01][..]);
        assert!(decode_envelope(&mut buf, DEFAULT_MAX_PAYLOAD).unwrap().is_none());
    }

    #[test]
    fn incomplete_body_needs_more() {
        let mut buf = BytesMut::new();
        encode_envelope("telemetry", b"hello", &mut buf).unwrap();
        buf.truncate(HEADER_SIZE + 4);
        assert!(decode_envelope(&mut buf, DEFAULT_MAX_PAYLOAD).unwrap().is_none());
    }

    #[test]
    fn invalid_magic() {
        let mut buf = BytesMut::from(&[0xFF, 0xFF, 0, 0, 0, 0, 0, 0][..]);
        assert!(matches!(
            decode_envelope(&mut buf, DEFAULT_MAX_PAYLOAD),
            Err(SinkError::InvalidMagic)
        ));
    }

    #[test]
    fn oversized_payload_rejected_from_header() {
        let mut buf = BytesMut::new();
        buf.put_slice(&MAGIC);
        buf.put_u16_le(1);
        buf.put_u32_le(64 * 1024 * 1024);
        assert!(matches!(
            decode_envelope(&mut buf, DEFAULT_MAX_PAYLOAD),
            Err(SinkError::PayloadTooLarge { .. })
        ));
    }

    #[test]
    fn empty_topic_rejected_both_ways() {
        let mut buf = BytesMut::new();
        assert!(matches!(
            encode_envelope("", b"x", &mut buf),
            Err(SinkError::InvalidTopic(_))
        ));

        buf.put_slice(&MAGIC);
        buf.put_u16_le(0);
        buf.put_u32_le(1);
        buf.put_u8(0x01);
        assert!(matches!(
            decode_envelope(&mut buf, DEFAULT_MAX_PAYLOAD),
            Err(SinkError::InvalidTopic(_))
        ));
    }

    #[test]
    fn non_utf8_topic_rejected() {
        let mut buf = BytesMut::new();
        buf.put_slice(&MAGIC);
        buf.put_u16_le(2);
        buf.put_u32_le(0);
        buf.put_slice(&[0xC3, 0x28]);
        assert!(matches!(
            decode_envelope(&mut buf, DEFAULT_MAX_PAYLOAD),
            Err(SinkError::InvalidTopic(_))
        ));
    }

    #[test]
    fn multiple_envelopes_in_one_buffer() {
        let mut buf = BytesMut::new();
        encode_envelope("a", b"first", &mut buf).unwrap();
        encode_envelope("b", b"second", &mut buf).unwrap();

        let first = decode_envelope(&mut buf, DEFAULT_MAX_PAYLOAD).unwrap().unwrap();
        let second = decode_envelope(&mut buf, DEFAULT_MAX_PAYLOAD).unwrap().unwrap();
        assert_eq!(first, Envelope::new("a", &b"first"[..]));
        assert_eq!(second, Envelope::new("b", &b"second"[..]));
        assert_eq!(second.wire_size(), HEADER_SIZE + 1 + 6);
        assert!(buf.is_empty());
    }
}
