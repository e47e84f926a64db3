use std::ops::Deref;

use bytes::Bytes;

/// A validated payload, detached from its wire framing.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Packet(Bytes);

impl Packet {
    /// Wrap validated payload bytes.
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self(payload.into())
    }

    /// Payload bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Cheap, reference-counted copy of the payload.
    pub fn bytes(&self) -> Bytes {
        self.0.clone()
    }

    /// Take the payload.
    pub fn into_bytes(self) -> Bytes {
        self.0
    }
}

impl Deref for Packet {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.0
    }
}

impl AsRef<[u8]> for Packet {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<Vec<u8>> for Packet {
    fn from(payload: Vec<u8>) -> Self {
        Self(Bytes::from(payload))
    }
}

impl From<Bytes> for Packet {
    fn from(payload: Bytes) -> Self {
        Self(payload)
    }
}
