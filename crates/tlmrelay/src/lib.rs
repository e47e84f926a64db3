//! Serial telemetry frame relay.
//!
//! tlmrelay reads an unstructured byte stream (usually a serial link),
//! finds fixed-length `START | PAYLOAD | END | CHECKSUM` frames in it, and
//! forwards each validated payload to a message bus.
//!
//! # Crate Structure
//!
//! - [`transport`]: byte sources (serial ports, replay files) and the bus socket
//! - [`frame`]: frame configuration, checksum and the byte-at-a-time synchronizer
//! - [`sink`]: packet sinks and the bus envelope codec
//! - [`decode`]: layout-driven diagnostic decoding
//! - [`relay`]: the relay loop and its threaded variant

/// Re-export transport types.
pub mod transport {
    pub use tlmrelay_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use tlmrelay_frame::*;
}

/// Re-export sink types.
pub mod sink {
    pub use tlmrelay_sink::*;
}

/// Re-export decode types.
pub mod decode {
    pub use tlmrelay_decode::*;
}

/// Re-export relay types.
pub mod relay {
    pub use tlmrelay_relay::*;
}
