use std::time::Duration;

use serialport::{DataBits, FlowControl, Parity, SerialPort, SerialPortType, StopBits};
use tracing::info;

use crate::error::{Result, TransportError};
use crate::source::ByteStream;

/// Default line speed.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Default per-read timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

/// A serial port opened as a byte source.
pub type SerialSource = ByteStream<Box<dyn SerialPort>>;

/// Serial line settings. Framing is always 8 data bits, no parity, 1 stop bit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialConfig {
    /// Device name (e.g. `/dev/ttyUSB0`, `COM3`).
    pub port: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Initial read timeout.
    pub timeout: Duration,
}

impl SerialConfig {
    /// Settings for `port` with default speed and timeout.
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            baud_rate: DEFAULT_BAUD_RATE,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Override the baud rate.
    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }
}

/// Open a serial device as 8N1 with no flow control.
pub fn open_serial(config: &SerialConfig) -> Result<SerialSource> {
    let port = serialport::new(&config.port, config.baud_rate)
        .data_bits(DataBits::Eight)
        .parity(Parity::None)
        .stop_bits(StopBits::One)
        .flow_control(FlowControl::None)
        .timeout(config.timeout)
        .open()
        .map_err(|err| TransportError::Open {
            port: config.port.clone(),
            source: err.into(),
        })?;

    info!(port = %config.port, baud_rate = config.baud_rate, "opened serial port");
    Ok(ByteStream::new(port))
}

/// A serial device visible to the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    /// Device name to pass to [`SerialConfig::new`].
    pub name: String,
    /// Bus kind: `usb`, `pci`, `bluetooth` or `unknown`.
    pub kind: &'static str,
    /// Product or manufacturer string, when the OS reports one.
    pub description: Option<String>,
}

/// Enumerate serial devices.
pub fn list_ports() -> Result<Vec<PortInfo>> {
    let ports = serialport::available_ports().map_err(|err| TransportError::Enumerate(err.into()))?;

    Ok(ports
        .into_iter()
        .map(|port| {
            let (kind, description) = match port.port_type {
                SerialPortType::UsbPort(usb) => ("usb", usb.product.or(usb.manufacturer)),
                SerialPortType::PciPort => ("pci", None),
                SerialPortType::BluetoothPort => ("bluetooth", None),
                SerialPortType::Unknown => ("unknown", None),
            };
            PortInfo {
                name: port.port_name,
                kind,
                description,
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults_match_reference_link() {
        let config = SerialConfig::new("/dev/ttyUSB0");
        assert_eq!(config.port, "/dev/ttyUSB0");
        assert_eq!(config.baud_rate, DEFAULT_BAUD_RATE);
        assert_eq!(config.timeout, DEFAULT_TIMEOUT);

        let config = config.with_baud_rate(9600);
        assert_eq!(config.baud_rate, 9600);
    }

    #[test]
    fn opening_missing_device_reports_port() {
        let config = SerialConfig::new("/dev/tlmrelay-does-not-exist");
        let err = open_serial(&config).unwrap_err();
        match err {
            TransportError::Open { port, .. } => assert_eq!(port, "/dev/tlmrelay-does-not-exist"),
            other => panic!("unexpected error: {other}"),
        }
    }
}
