//! Byte-level transports for tlmrelay.
//!
//! Provides the [`ByteSource`] contract the relay pulls from, plus the
//! concrete endpoints a deployment needs:
//! - Serial ports (behind the `serial` feature)
//! - Recorded captures and any other [`std::io::Read`] via [`ByteStream`]
//! - Unix domain sockets for the local message bus
//!
//! This is the lowest layer of tlmrelay. Nothing in here knows about frames.

pub mod error;
#[cfg(feature = "serial")]
pub mod serial;
pub mod source;

#[cfg(unix)]
pub mod uds;

pub use error::{Result, TransportError};
pub use source::{ByteSource, ByteStream, TimeoutRead};

#[cfg(feature = "serial")]
pub use serial::{list_ports, open_serial, PortInfo, SerialConfig, SerialSource};

#[cfg(unix)]
pub use uds::BusSocket;
