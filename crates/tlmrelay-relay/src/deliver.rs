use tlmrelay_decode::DiagnosticDecoder;
use tlmrelay_frame::Packet;
use tlmrelay_sink::PacketSink;
use tracing::{debug, warn};

use crate::error::{RelayError, Result};
use crate::relay::{PublishFailurePolicy, RelayStats};

/// Publish side of a relay: sink, optional decoder and their counters.
pub(crate) struct Delivery<P> {
    sink: P,
    decoder: Option<Box<dyn DiagnosticDecoder>>,
    policy: PublishFailurePolicy,
    stats: RelayStats,
}

impl<P: PacketSink> Delivery<P> {
    pub(crate) fn new(sink: P, policy: PublishFailurePolicy) -> Self {
        Self {
            sink,
            decoder: None,
            policy,
            stats: RelayStats::default(),
        }
    }

    pub(crate) fn set_decoder(&mut self, decoder: Box<dyn DiagnosticDecoder>) {
        self.decoder = Some(decoder);
    }

    /// Publish `packet`, then decode it regardless of the publish outcome.
    pub(crate) fn deliver(&mut self, packet: &Packet) -> Result<()> {
        let published = self.sink.publish(packet);
        self.decode(packet);

        match published {
            Ok(()) => {
                self.stats.packets_published = self.stats.packets_published.saturating_add(1);
                Ok(())
            }
            Err(err) => {
                self.stats.publish_failures = self.stats.publish_failures.saturating_add(1);
                match self.policy {
                    PublishFailurePolicy::Abort => Err(RelayError::Publish(err)),
                    PublishFailurePolicy::Continue => {
                        warn!(error = %err, size = packet.len(), "publish failed; packet dropped");
                        Ok(())
                    }
                }
            }
        }
    }

    fn decode(&mut self, packet: &Packet) {
        let Some(decoder) = &self.decoder else {
            return;
        };
        match decoder.decode(packet.as_bytes()) {
            Ok(value) => {
                self.stats.packets_decoded = self.stats.packets_decoded.saturating_add(1);
                debug!(decoded = %value, "decoded packet");
            }
            Err(err) => {
                self.stats.decode_failures = self.stats.decode_failures.saturating_add(1);
                debug!(error = %err, "diagnostic decode failed");
            }
        }
    }

    pub(crate) fn close(&mut self) -> Result<()> {
        self.sink.close().map_err(RelayError::Publish)
    }

    pub(crate) fn stats(&self) -> RelayStats {
        self.stats
    }
}
