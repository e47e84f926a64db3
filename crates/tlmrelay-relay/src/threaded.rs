use std::thread;
use std::time::Duration;

use tlmrelay_decode::DiagnosticDecoder;
use tlmrelay_frame::{FrameConfig, Packet, SyncStats};
use tlmrelay_sink::PacketSink;
use tlmrelay_transport::ByteSource;
use tracing::{debug, info, warn};

use crate::deliver::Delivery;
use crate::error::{RelayError, Result};
use crate::handoff::{
    self, HandoffPolicy, HandoffReceiver, HandoffSender, RecvTimeoutError, SendTimeoutError,
};
use crate::relay::{
    end_of_stream, finish, Ingest, RelayConfig, RelayStats, RelaySummary, StopReason,
};
use crate::stop::StopHandle;

/// Upper bound on one blocked hand-off wait, so ingest notices stop requests.
const HANDOFF_WAIT_SLICE: Duration = Duration::from_millis(100);

/// Relay split across two threads.
///
/// An ingest thread owns the byte source and synchronizer; the calling
/// thread owns the sink and decoder. Packets cross over through a capacity-1
/// [`handoff`](crate::handoff) queue with the configured [`HandoffPolicy`].
pub struct ThreadedRelay<S, P> {
    source: S,
    sink: P,
    frame: FrameConfig,
    config: RelayConfig,
    policy: HandoffPolicy,
    decoder: Option<Box<dyn DiagnosticDecoder>>,
    stop: StopHandle,
}

struct IngestReport {
    outcome: Result<StopReason>,
    stats: RelayStats,
    sync: SyncStats,
}

impl<S: ByteSource + Send, P: PacketSink> ThreadedRelay<S, P> {
    pub fn new(source: S, sink: P, frame: FrameConfig) -> Self {
        Self::with_config(source, sink, frame, RelayConfig::default())
    }

    pub fn with_config(source: S, sink: P, frame: FrameConfig, config: RelayConfig) -> Self {
        Self {
            source,
            sink,
            frame,
            config,
            policy: HandoffPolicy::default(),
            decoder: None,
            stop: StopHandle::new(),
        }
    }

    pub fn with_handoff_policy(mut self, policy: HandoffPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_decoder(mut self, decoder: Box<dyn DiagnosticDecoder>) -> Self {
        self.decoder = Some(decoder);
        self
    }

    pub fn with_stop_handle(mut self, stop: StopHandle) -> Self {
        self.stop = stop;
        self
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Relay until stopped, end of stream, or a fatal error on either side.
    ///
    /// The ingest thread is always joined and the sink always closed before
    /// this returns.
    pub fn run(self) -> Result<RelaySummary> {
        let ThreadedRelay {
            source,
            sink,
            frame,
            config,
            policy,
            decoder,
            stop,
        } = self;

        let mut delivery = Delivery::new(sink, config.publish_failure);
        if let Some(decoder) = decoder {
            delivery.set_decoder(decoder);
        }
        let (tx, rx) = handoff::channel(policy);
        let counters = rx.counters();

        info!(
            start = frame.start(),
            end = frame.end(),
            payload_len = frame.payload_len(),
            handoff = policy.name(),
            "threaded relay started"
        );

        let ran = thread::scope(|scope| -> Result<(Result<()>, IngestReport)> {
            let ingest_stop = stop.clone();
            let handle = thread::Builder::new()
                .name("tlmrelay-ingest".to_string())
                .spawn_scoped(scope, move || {
                    let ingest = Ingest::new(source, frame, config.read_timeout);
                    ingest_loop(ingest, tx, &ingest_stop)
                })
                .map_err(RelayError::Spawn)?;

            let consumed = consume(&mut delivery, &rx, config.read_timeout);
            // Disconnects an ingest thread blocked on a full slot after a publish error.
            rx.close();
            let report = handle.join().map_err(|_| RelayError::IngestPanicked)?;
            Ok((consumed, report))
        });

        let closed = delivery.close();
        let (consumed, report) = match ran {
            Ok(parts) => parts,
            Err(err) => {
                if let Err(close_err) = closed {
                    warn!(error = %close_err, "sink close failed after relay error");
                }
                return Err(err);
            }
        };

        let summary = RelaySummary {
            reason: StopReason::Requested,
            relay: RelayStats::merge(report.stats, delivery.stats()),
            sync: report.sync,
            handoff: Some(counters.snapshot()),
        };
        drop(delivery);

        let outcome = consumed.and(report.outcome);
        finish(outcome, closed, summary)
    }
}

fn ingest_loop<S: ByteSource>(
    mut ingest: Ingest<S>,
    tx: HandoffSender,
    stop: &StopHandle,
) -> IngestReport {
    let outcome = loop {
        if stop.is_stopped() || tx.is_closed() {
            break Ok(StopReason::Requested);
        }
        match ingest.step() {
            Ok(Some(packet)) => {
                if !offer(&tx, packet, stop) {
                    break Ok(StopReason::Requested);
                }
            }
            Ok(None) => {}
            Err(err) => break end_of_stream(err),
        }
    };
    drop(tx);

    IngestReport {
        outcome,
        stats: ingest.stats(),
        sync: ingest.synchronizer().stats(),
    }
}

/// Hand `packet` to the publish side. False when shutdown won the race.
fn offer(tx: &HandoffSender, mut packet: Packet, stop: &StopHandle) -> bool {
    loop {
        match tx.send_timeout(packet, HANDOFF_WAIT_SLICE) {
            Ok(()) => return true,
            Err(SendTimeoutError::Timeout(returned)) => {
                if stop.is_stopped() {
                    debug!(size = returned.len(), "stop requested with packet awaiting hand-off");
                    return false;
                }
                packet = returned;
            }
            Err(SendTimeoutError::Disconnected(_)) => return false,
        }
    }
}

fn consume<P: PacketSink>(
    delivery: &mut Delivery<P>,
    rx: &HandoffReceiver,
    wait: Duration,
) -> Result<()> {
    loop {
        match rx.recv_timeout(wait) {
            Ok(packet) => delivery.deliver(&packet)?,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => return Ok(()),
        }
    }
}
