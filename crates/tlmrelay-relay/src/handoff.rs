//! Capacity-1 hand-off between an ingest thread and a publish thread.
//!
//! Built on a `crossbeam_channel::bounded(1)` channel. What happens when the
//! producer has a new packet while the previous one is still pending is
//! chosen up front:
//!
//! - [`HandoffPolicy::Block`]: the producer waits for the consumer. No packet
//!   is lost, and a slow sink slows ingest down.
//! - [`HandoffPolicy::DropOldest`]: the pending packet is evicted and counted
//!   in [`HandoffStats::dropped`]. Ingest never waits.
//!
//! Dropping either end disconnects the other. The receiver still drains a
//! pending packet after the sender is gone.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, TrySendError};
use tlmrelay_frame::Packet;

/// Producer behavior when the slot is occupied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HandoffPolicy {
    /// Wait until the consumer takes the pending packet.
    #[default]
    Block,
    /// Evict the pending packet and count it as dropped.
    DropOldest,
}

impl HandoffPolicy {
    pub fn name(self) -> &'static str {
        match self {
            HandoffPolicy::Block => "block",
            HandoffPolicy::DropOldest => "drop-oldest",
        }
    }
}

/// Hand-off counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HandoffStats {
    /// Packets accepted by the sender.
    pub sent: u64,
    /// Packets taken by the receiver.
    pub received: u64,
    /// Pending packets evicted under [`HandoffPolicy::DropOldest`].
    pub dropped: u64,
}

/// Error from [`HandoffSender::send_timeout`]. The packet is handed back.
#[derive(Debug, thiserror::Error)]
pub enum SendTimeoutError {
    #[error("timed out waiting for the hand-off slot")]
    Timeout(Packet),
    #[error("hand-off receiver closed")]
    Disconnected(Packet),
}

/// Error from [`HandoffReceiver::recv_timeout`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RecvTimeoutError {
    #[error("timed out waiting for a packet")]
    Timeout,
    #[error("hand-off sender closed")]
    Disconnected,
}

#[derive(Debug, Default)]
struct Shared {
    sent: AtomicU64,
    received: AtomicU64,
    dropped: AtomicU64,
    // The evicting sender keeps a receiver clone, so the channel alone
    // cannot tell it the consumer is gone.
    receiver_closed: AtomicBool,
}

/// Read-only view of a hand-off's counters that outlives both ends.
#[derive(Debug, Clone)]
pub struct HandoffCounters(Arc<Shared>);

impl HandoffCounters {
    pub fn snapshot(&self) -> HandoffStats {
        HandoffStats {
            sent: self.0.sent.load(Ordering::Relaxed),
            received: self.0.received.load(Ordering::Relaxed),
            dropped: self.0.dropped.load(Ordering::Relaxed),
        }
    }
}

/// Create a connected sender/receiver pair.
pub fn channel(policy: HandoffPolicy) -> (HandoffSender, HandoffReceiver) {
    let (tx, rx) = crossbeam_channel::bounded(1);
    let shared = Arc::new(Shared::default());
    let evict = match policy {
        HandoffPolicy::Block => None,
        HandoffPolicy::DropOldest => Some(rx.clone()),
    };
    (
        HandoffSender {
            tx,
            evict,
            shared: Arc::clone(&shared),
        },
        HandoffReceiver { rx, shared },
    )
}

/// Producer end. Dropping it disconnects the receiver.
pub struct HandoffSender {
    tx: Sender<Packet>,
    evict: Option<Receiver<Packet>>,
    shared: Arc<Shared>,
}

impl HandoffSender {
    /// Offer `packet`, waiting at most `timeout` under [`HandoffPolicy::Block`].
    ///
    /// Never waits under [`HandoffPolicy::DropOldest`].
    pub fn send_timeout(&self, packet: Packet, timeout: Duration) -> Result<(), SendTimeoutError> {
        if self.is_closed() {
            return Err(SendTimeoutError::Disconnected(packet));
        }

        let sent = match &self.evict {
            None => self.tx.send_timeout(packet, timeout).map_err(|err| match err {
                crossbeam_channel::SendTimeoutError::Timeout(packet) => {
                    SendTimeoutError::Timeout(packet)
                }
                crossbeam_channel::SendTimeoutError::Disconnected(packet) => {
                    SendTimeoutError::Disconnected(packet)
                }
            }),
            Some(evict) => self.replace_pending(evict, packet),
        };
        if sent.is_ok() {
            self.shared.sent.fetch_add(1, Ordering::Relaxed);
        }
        sent
    }

    // Single producer: once a pending packet is evicted, the next try_send fits.
    fn replace_pending(
        &self,
        evict: &Receiver<Packet>,
        mut packet: Packet,
    ) -> Result<(), SendTimeoutError> {
        loop {
            match self.tx.try_send(packet) {
                Ok(()) => return Ok(()),
                Err(TrySendError::Full(returned)) => {
                    if evict.try_recv().is_ok() {
                        self.shared.dropped.fetch_add(1, Ordering::Relaxed);
                    }
                    packet = returned;
                }
                Err(TrySendError::Disconnected(returned)) => {
                    return Err(SendTimeoutError::Disconnected(returned));
                }
            }
        }
    }

    pub fn policy(&self) -> HandoffPolicy {
        if self.evict.is_some() {
            HandoffPolicy::DropOldest
        } else {
            HandoffPolicy::Block
        }
    }

    /// True once the receiver has been closed or dropped.
    pub fn is_closed(&self) -> bool {
        self.shared.receiver_closed.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> HandoffStats {
        self.counters().snapshot()
    }

    pub fn counters(&self) -> HandoffCounters {
        HandoffCounters(Arc::clone(&self.shared))
    }

    /// Disconnect; the receiver drains whatever is pending.
    pub fn close(self) {}
}

/// Consumer end. Dropping it disconnects the sender.
pub struct HandoffReceiver {
    rx: Receiver<Packet>,
    shared: Arc<Shared>,
}

impl HandoffReceiver {
    /// Take the pending packet, waiting at most `timeout` for one.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Packet, RecvTimeoutError> {
        match self.rx.recv_timeout(timeout) {
            Ok(packet) => {
                self.shared.received.fetch_add(1, Ordering::Relaxed);
                Ok(packet)
            }
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => Err(RecvTimeoutError::Timeout),
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                Err(RecvTimeoutError::Disconnected)
            }
        }
    }

    pub fn stats(&self) -> HandoffStats {
        self.counters().snapshot()
    }

    pub fn counters(&self) -> HandoffCounters {
        HandoffCounters(Arc::clone(&self.shared))
    }

    /// Disconnect; a sender blocked on a full slot fails with `Disconnected`.
    pub fn close(self) {}
}

impl Drop for HandoffReceiver {
    fn drop(&mut self) {
        self.shared.receiver_closed.store(true, Ordering::Release);
    }
}
