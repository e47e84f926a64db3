use bytes::{BufMut, Bytes, BytesMut};
use tracing::{debug, trace};

use crate::checksum::checksum;
use crate::config::FrameConfig;
use crate::packet::Packet;

/// Where the synchronizer is within the current frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// Scanning for a START marker. Every other byte is noise.
    AwaitingStart,
    /// Collecting payload bytes.
    Receiving,
    /// Payload complete; the next byte must be the END marker.
    AwaitingEnd,
    /// END matched; the next byte is the received checksum.
    AwaitingChecksum,
}

impl SyncState {
    /// Stable name for logs.
    pub fn name(self) -> &'static str {
        match self {
            SyncState::AwaitingStart => "awaiting_start",
            SyncState::Receiving => "receiving",
            SyncState::AwaitingEnd => "awaiting_end",
            SyncState::AwaitingChecksum => "awaiting_checksum",
        }
    }
}

/// Why a frame attempt was thrown away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// The byte after the payload was not the END marker.
    EndMarker { found: u8 },
    /// The trailing checksum did not match the payload.
    Checksum { expected: u8, received: u8 },
}

/// Outcome of feeding one byte to [`FrameSynchronizer::process`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncEvent {
    /// Byte ignored while scanning for START.
    Discarded,
    /// START recognized; a new frame attempt began.
    FrameStarted,
    /// Payload byte stored; more are expected.
    Accumulating,
    /// Final payload byte stored.
    PayloadComplete,
    /// END marker matched.
    EndMatched,
    /// Checksum matched; a packet is waiting in the slot.
    Accepted,
    /// Frame attempt dropped; the synchronizer is scanning again.
    Rejected(RejectReason),
}

impl SyncEvent {
    /// True when this byte completed a valid frame.
    pub fn is_accepted(&self) -> bool {
        matches!(self, SyncEvent::Accepted)
    }

    /// True when this byte caused a frame to be dropped.
    pub fn is_rejected(&self) -> bool {
        matches!(self, SyncEvent::Rejected(_))
    }
}

/// Running counters for operational visibility.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStats {
    /// Every byte passed to `process`.
    pub bytes_processed: u64,
    /// Bytes skipped while scanning for START.
    pub bytes_discarded: u64,
    /// START markers recognized.
    pub frames_started: u64,
    /// Frames that passed END and checksum validation.
    pub frames_accepted: u64,
    /// Frames dropped because the END marker was wrong.
    pub end_marker_rejects: u64,
    /// Frames dropped because the checksum did not match.
    pub checksum_rejects: u64,
    /// Unconsumed packets replaced by a newer valid frame.
    pub packets_overwritten: u64,
    /// Unconsumed packets cleared by a checksum failure.
    pub packets_dropped: u64,
}

impl SyncStats {
    /// All rejected frame attempts.
    pub fn frames_rejected(&self) -> u64 {
        self.end_marker_rejects.saturating_add(self.checksum_rejects)
    }
}

/// Byte-at-a-time frame synchronizer.
///
/// Locates `START | PAYLOAD(N) | END | CHECKSUM` frames in a raw stream,
/// validates them, and keeps the most recent valid payload in a single slot
/// until [`take_packet`](Self::take_packet) removes it. Memory use is one
/// N-byte buffer; work per byte is constant.
pub struct FrameSynchronizer {
    config: FrameConfig,
    state: SyncState,
    buffer: BytesMut,
    packet: Option<Packet>,
    stats: SyncStats,
}

impl FrameSynchronizer {
    /// Create a synchronizer for the given frame shape.
    pub fn new(config: FrameConfig) -> Self {
        Self {
            config,
            state: SyncState::AwaitingStart,
            buffer: BytesMut::with_capacity(config.payload_len()),
            packet: None,
            stats: SyncStats::default(),
        }
    }

    /// Feed one received byte.
    pub fn process(&mut self, byte: u8) -> SyncEvent {
        self.stats.bytes_processed = self.stats.bytes_processed.saturating_add(1);
        let previous = self.state;

        let event = match previous {
            SyncState::AwaitingStart if byte == self.config.start() => {
                self.buffer.clear();
                self.state = SyncState::Receiving;
                self.stats.frames_started = self.stats.frames_started.saturating_add(1);
                SyncEvent::FrameStarted
            }
            SyncState::AwaitingStart => {
                self.stats.bytes_discarded = self.stats.bytes_discarded.saturating_add(1);
                SyncEvent::Discarded
            }
            SyncState::Receiving => {
                self.buffer.put_u8(byte);
                if self.buffer.len() == self.config.payload_len() {
                    self.state = SyncState::AwaitingEnd;
                    SyncEvent::PayloadComplete
                } else {
                    SyncEvent::Accumulating
                }
            }
            SyncState::AwaitingEnd if byte == self.config.end() => {
                self.state = SyncState::AwaitingChecksum;
                SyncEvent::EndMatched
            }
            SyncState::AwaitingEnd => {
                // The offending byte is dropped too, even if it equals START.
                self.buffer.clear();
                self.state = SyncState::AwaitingStart;
                self.stats.end_marker_rejects = self.stats.end_marker_rejects.saturating_add(1);
                debug!(
                    expected = self.config.end(),
                    found = byte,
                    "frame rejected: end marker mismatch"
                );
                SyncEvent::Rejected(RejectReason::EndMarker { found: byte })
            }
            SyncState::AwaitingChecksum => {
                self.state = SyncState::AwaitingStart;
                self.validate(byte)
            }
        };

        if previous != self.state {
            trace!(
                byte,
                from = previous.name(),
                to = self.state.name(),
                "sync state change"
            );
        }

        event
    }

    fn validate(&mut self, received: u8) -> SyncEvent {
        let expected = checksum(&self.buffer);

        let event = if received == expected {
            let packet = Packet::new(Bytes::copy_from_slice(&self.buffer));
            if self.packet.replace(packet).is_some() {
                self.stats.packets_overwritten = self.stats.packets_overwritten.saturating_add(1);
                debug!("unconsumed packet overwritten by newer frame");
            }
            self.stats.frames_accepted = self.stats.frames_accepted.saturating_add(1);
            SyncEvent::Accepted
        } else {
            if self.packet.take().is_some() {
                self.stats.packets_dropped = self.stats.packets_dropped.saturating_add(1);
            }
            self.stats.checksum_rejects = self.stats.checksum_rejects.saturating_add(1);
            debug!(expected, received, "frame rejected: checksum mismatch");
            SyncEvent::Rejected(RejectReason::Checksum { expected, received })
        };

        self.buffer.clear();
        event
    }

    /// Remove and return the pending packet, if any.
    pub fn take_packet(&mut self) -> Option<Packet> {
        self.packet.take()
    }

    /// True when a validated packet is waiting.
    pub fn has_packet(&self) -> bool {
        self.packet.is_some()
    }

    /// Drop any partial frame and scan for START again. Stats and the packet slot are kept.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.state = SyncState::AwaitingStart;
    }

    /// Current state.
    pub fn state(&self) -> SyncState {
        self.state
    }

    /// Payload bytes accumulated for the current frame attempt.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Frame shape this synchronizer was built with.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }

    /// Counters since construction.
    pub fn stats(&self) -> SyncStats {
        self.stats
    }
}

impl Default for FrameSynchronizer {
    fn default() -> Self {
        Self::new(FrameConfig::default())
    }
}

impl std::fmt::Debug for FrameSynchronizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameSynchronizer")
            .field("config", &self.config)
            .field("state", &self.state)
            .field("buffered", &self.buffer.len())
            .field("has_packet", &self.packet.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::encode_frame;

    const START: u8 = 0xFF;
    const END: u8 = 0xEE;
    const LEN: usize = 160;

    fn synchronizer() -> FrameSynchronizer {
        FrameSynchronizer::new(FrameConfig::new(START, END, LEN).unwrap())
    }

    fn payload() -> Vec<u8> {
        (0..LEN).map(|i| (i % 256) as u8).collect()
    }

    fn valid_frame(payload: &[u8]) -> Vec<u8> {
        let mut buf = BytesMut::new();
        encode_frame(&FrameConfig::new(START, END, payload.len()).unwrap(), payload, &mut buf)
            .unwrap();
        buf.to_vec()
    }

    fn feed(sync: &mut FrameSynchronizer, bytes: &[u8]) -> Vec<SyncEvent> {
        bytes.iter().map(|&b| sync.process(b)).collect()
    }

    #[test]
    fn starts_awaiting_start_and_empty() {
        let sync = synchronizer();
        assert_eq!(sync.state(), SyncState::AwaitingStart);
        assert_eq!(sync.buffered_len(), 0);
        assert!(!sync.has_packet());
    }

    #[test]
    fn noise_is_discarded_while_idle() {
        let mut sync = synchronizer();
        for byte in (0..=255u8).filter(|&b| b != START) {
            assert_eq!(sync.process(byte), SyncEvent::Discarded);
            assert_eq!(sync.state(), SyncState::AwaitingStart);
            assert_eq!(sync.buffered_len(), 0);
        }
        assert_eq!(sync.stats().bytes_discarded, 255);
    }

    #[test]
    fn start_marker_begins_receiving_without_buffering_it() {
        let mut sync = synchronizer();
        assert_eq!(sync.process(START), SyncEvent::FrameStarted);
        assert_eq!(sync.state(), SyncState::Receiving);
        assert_eq!(sync.buffered_len(), 0);
    }

    #[test]
    fn full_payload_moves_to_awaiting_end() {
        let mut sync = synchronizer();
        let data = payload();
        sync.process(START);

        for &byte in &data[..LEN - 1] {
            assert_eq!(sync.process(byte), SyncEvent::Accumulating);
            assert_eq!(sync.state(), SyncState::Receiving);
        }
        assert_eq!(sync.buffered_len(), LEN - 1);

        assert_eq!(sync.process(data[LEN - 1]), SyncEvent::PayloadComplete);
        assert_eq!(sync.state(), SyncState::AwaitingEnd);
        assert_eq!(sync.buffered_len(), LEN);
    }

    #[test]
    fn valid_frame_yields_exactly_one_packet() {
        let mut sync = synchronizer();
        let data = payload();

        sync.process(0x01);
        let events = feed(&mut sync, &valid_frame(&data));

        assert_eq!(events.last(), Some(&SyncEvent::Accepted));
        let packet = sync.take_packet().expect("packet should be available");
        assert_eq!(packet.as_bytes(), data.as_slice());
        assert!(sync.take_packet().is_none());
        assert_eq!(sync.state(), SyncState::AwaitingStart);
        assert_eq!(sync.buffered_len(), 0);
    }

    #[test]
    fn wrong_end_marker_rejects_frame() {
        let mut sync = synchronizer();
        let data = payload();
        let mut frame = vec![START];
        frame.extend_from_slice(&data);
        frame.push(0xDD);
        frame.push(checksum(&data));

        let events = feed(&mut sync, &frame);

        assert_eq!(
            events[LEN + 1],
            SyncEvent::Rejected(RejectReason::EndMarker { found: 0xDD })
        );
        assert!(sync.take_packet().is_none());
        assert_eq!(sync.state(), SyncState::AwaitingStart);
        assert_eq!(sync.stats().end_marker_rejects, 1);
    }

    #[test]
    fn wrong_checksum_rejects_frame() {
        let mut sync = synchronizer();
        let data = payload();
        let mut frame = vec![START];
        frame.extend_from_slice(&data);
        frame.push(END);
        frame.push(0x11);

        let events = feed(&mut sync, &frame);

        assert_eq!(
            events.last(),
            Some(&SyncEvent::Rejected(RejectReason::Checksum {
                expected: checksum(&data),
                received: 0x11
            }))
        );
        assert!(sync.take_packet().is_none());
        assert_eq!(sync.state(), SyncState::AwaitingStart);
        assert_eq!(sync.stats().checksum_rejects, 1);
    }

    #[test]
    fn consecutive_frames_yield_packets_in_order() {
        let mut sync = synchronizer();
        let first = payload();
        let second: Vec<u8> = first.iter().map(|b| b.wrapping_add(1)).collect();

        let mut stream = valid_frame(&first);
        stream.extend(valid_frame(&second));

        let mut packets = Vec::new();
        for byte in stream {
            sync.process(byte);
            if let Some(packet) = sync.take_packet() {
                packets.push(packet);
            }
        }

        assert_eq!(packets.len(), 2);
        assert_eq!(packets[0].as_bytes(), first.as_slice());
        assert_eq!(packets[1].as_bytes(), second.as_slice());
        assert!(sync.take_packet().is_none());
        assert_eq!(sync.state(), SyncState::AwaitingStart);
    }

    #[test]
    fn take_packet_is_idempotent_once_empty() {
        let mut sync = synchronizer();
        feed(&mut sync, &valid_frame(&payload()));

        assert!(sync.take_packet().is_some());
        for _ in 0..5 {
            assert!(sync.take_packet().is_none());
        }

        feed(&mut sync, &[0x00, 0x42, START, 0x01]);
        assert!(sync.take_packet().is_none());
    }

    #[test]
    fn marker_values_inside_payload_are_data() {
        let config = FrameConfig::new(START, END, 4).unwrap();
        let mut sync = FrameSynchronizer::new(config);
        let data = [START, END, START, END];

        let mut wire = BytesMut::new();
        encode_frame(&config, &data, &mut wire).unwrap();
        feed(&mut sync, &wire);

        assert_eq!(sync.take_packet().unwrap().as_bytes(), &data);
    }

    #[test]
    fn bad_end_byte_is_not_reinterpreted_as_start() {
        let config = FrameConfig::new(START, END, 4).unwrap();
        let mut sync = FrameSynchronizer::new(config);
        let data = [1u8, 2, 3, 4];

        // START is in the END position; the following bytes would form a
        // valid frame only if that START were honored.
        let mut stream = vec![START];
        stream.extend_from_slice(&data);
        stream.push(START);
        stream.extend_from_slice(&data);
        stream.push(END);
        stream.push(checksum(&data));

        feed(&mut sync, &stream);
        assert!(sync.take_packet().is_none());
        assert_eq!(sync.stats().frames_started, 1);
        assert_eq!(sync.stats().end_marker_rejects, 1);
    }

    #[test]
    fn resynchronizes_after_garbage_and_rejects() {
        let mut sync = synchronizer();
        let data = payload();

        let mut corrupted = valid_frame(&data);
        corrupted[10] ^= 0x40;

        let mut stream = vec![0x00, 0x13, 0x37];
        stream.extend(corrupted);
        stream.extend([0xAB, 0xCD]);
        stream.extend(valid_frame(&data));

        let events = feed(&mut sync, &stream);

        assert_eq!(events.iter().filter(|e| e.is_rejected()).count(), 1);
        assert_eq!(events.iter().filter(|e| e.is_accepted()).count(), 1);
        assert_eq!(sync.take_packet().unwrap().as_bytes(), data.as_slice());

        let stats = sync.stats();
        assert_eq!(stats.frames_accepted, 1);
        assert_eq!(stats.frames_rejected(), 1);
        assert_eq!(stats.bytes_processed, stream.len() as u64);
    }

    #[test]
    fn unconsumed_packet_is_overwritten_and_counted() {
        let mut sync = synchronizer();
        let first = payload();
        let second = vec![0x42; LEN];

        feed(&mut sync, &valid_frame(&first));
        feed(&mut sync, &valid_frame(&second));

        assert_eq!(sync.take_packet().unwrap().as_bytes(), second.as_slice());
        assert!(sync.take_packet().is_none());
        assert_eq!(sync.stats().packets_overwritten, 1);
    }

    #[test]
    fn checksum_failure_clears_unconsumed_packet() {
        let mut sync = synchronizer();
        let data = payload();
        let mut bad = valid_frame(&data);
        let last = bad.len() - 1;
        bad[last] ^= 0xFF;

        feed(&mut sync, &valid_frame(&data));
        assert!(sync.has_packet());
        feed(&mut sync, &bad);

        assert!(!sync.has_packet());
        assert_eq!(sync.stats().packets_dropped, 1);
    }

    #[test]
    fn single_byte_payload() {
        let config = FrameConfig::new(0x7E, 0x7F, 1).unwrap();
        let mut sync = FrameSynchronizer::new(config);

        assert_eq!(
            feed(&mut sync, &[0x7E, 0x33, 0x7F, 0x33]),
            vec![
                SyncEvent::FrameStarted,
                SyncEvent::PayloadComplete,
                SyncEvent::EndMatched,
                SyncEvent::Accepted,
            ]
        );
        assert_eq!(sync.take_packet().unwrap().as_bytes(), &[0x33]);
    }

    #[test]
    fn reset_drops_partial_frame_only() {
        let mut sync = synchronizer();
        feed(&mut sync, &valid_frame(&payload()));
        feed(&mut sync, &[START, 1, 2, 3]);
        assert_eq!(sync.buffered_len(), 3);

        sync.reset();
        assert_eq!(sync.state(), SyncState::AwaitingStart);
        assert_eq!(sync.buffered_len(), 0);
        assert!(sync.has_packet());
        assert_eq!(sync.stats().frames_started, 2);
    }
}
