//! Relay loop for tlmrelay.
//!
//! Pulls bytes from a [`ByteSource`](tlmrelay_transport::ByteSource), feeds a
//! [`FrameSynchronizer`](tlmrelay_frame::FrameSynchronizer), and forwards every
//! validated packet to a [`PacketSink`](tlmrelay_sink::PacketSink), with an
//! optional best-effort diagnostic decode.
//!
//! [`RelayLoop`] runs everything on the calling thread. [`ThreadedRelay`]
//! splits ingest and publishing across two threads joined by a capacity-1
//! [`handoff`] queue.

mod deliver;
pub mod error;
pub mod handoff;
pub mod relay;
pub mod stop;
pub mod threaded;

pub use error::{RelayError, Result};
pub use handoff::{HandoffCounters, HandoffPolicy, HandoffStats};
pub use relay::{
    PublishFailurePolicy, RelayConfig, RelayLoop, RelayStats, RelaySummary, StopReason,
    DEFAULT_READ_TIMEOUT,
};
pub use stop::StopHandle;
pub use threaded::ThreadedRelay;
