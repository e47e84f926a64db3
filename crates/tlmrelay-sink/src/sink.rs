use tlmrelay_frame::Packet;

use crate::error::Result;

/// Accepts validated packets for delivery.
///
/// Implementations do not retry; a failed `publish` is reported to the caller,
/// which decides whether to continue.
pub trait PacketSink {
    /// Deliver one packet.
    fn publish(&mut self, packet: &Packet) -> Result<()>;

    /// Flush and release the underlying connection. Called once on shutdown.
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<S: PacketSink + ?Sized> PacketSink for Box<S> {
    fn publish(&mut self, packet: &Packet) -> Result<()> {
        (**self).publish(packet)
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }
}

impl<S: PacketSink + ?Sized> PacketSink for &mut S {
    fn publish(&mut self, packet: &Packet) -> Result<()> {
        (**self).publish(packet)
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }
}
