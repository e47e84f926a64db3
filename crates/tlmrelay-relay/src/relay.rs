use std::time::Duration;

use tlmrelay_decode::DiagnosticDecoder;
use tlmrelay_frame::{FrameConfig, FrameSynchronizer, Packet, SyncStats};
use tlmrelay_sink::PacketSink;
use tlmrelay_transport::ByteSource;
use tracing::{info, warn};

use crate::deliver::Delivery;
use crate::error::{RelayError, Result};
use crate::handoff::HandoffStats;
use crate::stop::StopHandle;

/// Default per-read wait on the byte source.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(1);

/// What to do when the sink rejects a packet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PublishFailurePolicy {
    /// End the run with [`RelayError::Publish`].
    #[default]
    Abort,
    /// Log at `warn`, count the failure and keep relaying.
    Continue,
}

/// Relay behavior configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayConfig {
    /// Maximum wait for one byte before checking the stop flag again.
    pub read_timeout: Duration,
    pub publish_failure: PublishFailurePolicy,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            read_timeout: DEFAULT_READ_TIMEOUT,
            publish_failure: PublishFailurePolicy::default(),
        }
    }
}

/// Why a run ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The stop handle was triggered.
    Requested,
    /// The source reached end of stream (replay files).
    EndOfStream,
}

impl StopReason {
    pub fn name(self) -> &'static str {
        match self {
            StopReason::Requested => "requested",
            StopReason::EndOfStream => "end_of_stream",
        }
    }
}

/// Relay-level counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    /// Bytes received from the source.
    pub bytes_read: u64,
    /// Reads that timed out with no data.
    pub read_timeouts: u64,
    pub packets_published: u64,
    pub publish_failures: u64,
    pub packets_decoded: u64,
    pub decode_failures: u64,
}

impl RelayStats {
    pub(crate) fn merge(ingest: RelayStats, delivery: RelayStats) -> Self {
        Self {
            bytes_read: ingest.bytes_read,
            read_timeouts: ingest.read_timeouts,
            ..delivery
        }
    }
}

/// Result of a completed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelaySummary {
    pub reason: StopReason,
    pub relay: RelayStats,
    pub sync: SyncStats,
    /// Hand-off counters; only set by the threaded relay.
    pub handoff: Option<HandoffStats>,
}

/// Source side of a relay: reads bytes and runs the synchronizer.
pub(crate) struct Ingest<S> {
    source: S,
    synchronizer: FrameSynchronizer,
    read_timeout: Duration,
    stats: RelayStats,
}

impl<S: ByteSource> Ingest<S> {
    pub(crate) fn new(source: S, frame: FrameConfig, read_timeout: Duration) -> Self {
        Self {
            source,
            synchronizer: FrameSynchronizer::new(frame),
            read_timeout,
            stats: RelayStats::default(),
        }
    }

    /// Read at most one byte and return the packet it completed, if any.
    pub(crate) fn step(&mut self) -> Result<Option<Packet>> {
        match self.source.read_one(self.read_timeout)? {
            Some(byte) => {
                self.stats.bytes_read = self.stats.bytes_read.saturating_add(1);
                self.synchronizer.process(byte);
            }
            None => {
                self.stats.read_timeouts = self.stats.read_timeouts.saturating_add(1);
            }
        }
        Ok(self.synchronizer.take_packet())
    }

    pub(crate) fn synchronizer(&self) -> &FrameSynchronizer {
        &self.synchronizer
    }

    pub(crate) fn stats(&self) -> RelayStats {
        self.stats
    }
}

/// Maps end of stream to a clean stop; every other error passes through.
pub(crate) fn end_of_stream(err: RelayError) -> Result<StopReason> {
    match err {
        RelayError::Transport(err) if err.is_closed() => Ok(StopReason::EndOfStream),
        err => Err(err),
    }
}

/// Single-threaded relay from a [`ByteSource`] to a [`PacketSink`].
///
/// ```ignore
/// let relay = RelayLoop::new(source, sink, FrameConfig::default());
/// let stop = relay.stop_handle();
/// let summary = relay.run()?;
/// ```
pub struct RelayLoop<S, P> {
    ingest: Ingest<S>,
    delivery: Delivery<P>,
    stop: StopHandle,
}

impl<S: ByteSource, P: PacketSink> RelayLoop<S, P> {
    /// Relay frames of shape `frame` from `source` to `sink`.
    pub fn new(source: S, sink: P, frame: FrameConfig) -> Self {
        Self::with_config(source, sink, frame, RelayConfig::default())
    }

    pub fn with_config(source: S, sink: P, frame: FrameConfig, config: RelayConfig) -> Self {
        Self {
            ingest: Ingest::new(source, frame, config.read_timeout),
            delivery: Delivery::new(sink, config.publish_failure),
            stop: StopHandle::new(),
        }
    }

    /// Attach a diagnostic decoder run on every packet.
    pub fn with_decoder(mut self, decoder: Box<dyn DiagnosticDecoder>) -> Self {
        self.delivery.set_decoder(decoder);
        self
    }

    /// Share an existing stop handle (e.g. one wired to Ctrl-C).
    pub fn with_stop_handle(mut self, stop: StopHandle) -> Self {
        self.stop = stop;
        self
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn synchronizer(&self) -> &FrameSynchronizer {
        self.ingest.synchronizer()
    }

    pub fn stats(&self) -> RelayStats {
        RelayStats::merge(self.ingest.stats(), self.delivery.stats())
    }

    /// Run one iteration: read a byte, process it, deliver any packet.
    ///
    /// Returns the packet handed to the sink, if this byte completed one.
    pub fn poll_once(&mut self) -> Result<Option<Packet>> {
        let packet = self.ingest.step()?;
        if let Some(packet) = &packet {
            self.delivery.deliver(packet)?;
        }
        Ok(packet)
    }

    /// Relay until stopped, end of stream, or a fatal error.
    ///
    /// The sink is closed on every exit path, and source and sink are
    /// dropped before this returns.
    pub fn run(mut self) -> Result<RelaySummary> {
        let frame = *self.ingest.synchronizer().config();
        info!(
            start = frame.start(),
            end = frame.end(),
            payload_len = frame.payload_len(),
            "relay started"
        );

        let outcome = self.drive();
        let closed = self.delivery.close();
        let summary = RelaySummary {
            reason: StopReason::Requested,
            relay: self.stats(),
            sync: self.ingest.synchronizer().stats(),
            handoff: None,
        };
        drop(self);

        finish(outcome, closed, summary)
    }

    fn drive(&mut self) -> Result<StopReason> {
        loop {
            if self.stop.is_stopped() {
                return Ok(StopReason::Requested);
            }
            if let Err(err) = self.poll_once() {
                return end_of_stream(err);
            }
        }
    }
}

/// Combine the loop outcome with the sink close result; the first error wins.
pub(crate) fn finish(
    outcome: Result<StopReason>,
    closed: Result<()>,
    summary: RelaySummary,
) -> Result<RelaySummary> {
    match (outcome, closed) {
        (Ok(reason), Ok(())) => {
            let summary = RelaySummary { reason, ..summary };
            info!(
                reason = reason.name(),
                bytes_read = summary.relay.bytes_read,
                frames_accepted = summary.sync.frames_accepted,
                frames_rejected = summary.sync.frames_rejected(),
                packets_published = summary.relay.packets_published,
                publish_failures = summary.relay.publish_failures,
                decode_failures = summary.relay.decode_failures,
                "relay stopped"
            );
            Ok(summary)
        }
        (Ok(_), Err(err)) => Err(err),
        (Err(err), closed) => {
            if let Err(close_err) = closed {
                warn!(error = %close_err, "sink close failed after relay error");
            }
            Err(err)
        }
    }
}
