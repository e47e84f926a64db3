use std::fmt;
use std::io;

use tlmrelay_decode::DecodeError;
use tlmrelay_relay::RelayError;
use tlmrelay_sink::SinkError;
use tlmrelay_transport::TransportError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::NotFound | io::ErrorKind::ConnectionRefused => TRANSPORT_ERROR,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::Open { .. } | TransportError::Enumerate(_) => {
            CliError::new(TRANSPORT_ERROR, format!("{context}: {err}"))
        }
        TransportError::Bind { source, .. }
        | TransportError::Connect { source, .. }
        | TransportError::Accept(source)
        | TransportError::Io(source) => io_error(context, source),
        TransportError::PathTooLong { .. } => CliError::new(USAGE, format!("{context}: {err}")),
        TransportError::Closed => CliError::new(FAILURE, format!("{context}: {err}")),
    }
}

pub fn sink_error(context: &str, err: SinkError) -> CliError {
    match err {
        SinkError::Io(source) => io_error(context, source),
        SinkError::Transport(err) => transport_error(context, err),
        SinkError::InvalidTopic(_) | SinkError::TopicTooLong { .. } => {
            CliError::new(USAGE, format!("{context}: {err}"))
        }
        SinkError::InvalidMagic | SinkError::PayloadTooLarge { .. } => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        SinkError::WriteTimeout => CliError::new(TIMEOUT, format!("{context}: {err}")),
        SinkError::Broker(_) => CliError::new(TRANSPORT_ERROR, format!("{context}: {err}")),
        SinkError::ConnectionClosed | SinkError::Closed => {
            CliError::new(FAILURE, format!("{context}: {err}"))
        }
    }
}

pub fn decode_error(context: &str, err: DecodeError) -> CliError {
    match err {
        DecodeError::LoadFailed(_) => CliError::new(USAGE, format!("{context}: {err}")),
        other => CliError::new(DATA_INVALID, format!("{context}: {other}")),
    }
}

pub fn relay_error(context: &str, err: RelayError) -> CliError {
    match err {
        RelayError::Transport(err) => transport_error(context, err),
        RelayError::Publish(err) => sink_error(context, err),
        other => CliError::new(INTERNAL, format!("{context}: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_device_maps_to_transport_code() {
        let err = transport_error(
            "open failed",
            TransportError::Open {
                port: "/dev/ttyNOPE".to_string(),
                source: io::Error::from(io::ErrorKind::NotFound),
            },
        );
        assert_eq!(err.code, TRANSPORT_ERROR);
        assert!(err.message.starts_with("open failed: "));
    }

    #[test]
    fn publish_errors_unwrap_through_relay() {
        let err = relay_error(
            "relay failed",
            RelayError::Publish(SinkError::Io(io::Error::from(io::ErrorKind::PermissionDenied))),
        );
        assert_eq!(err.code, PERMISSION_DENIED);
    }

    #[test]
    fn stalled_bus_write_is_a_timeout() {
        let err = relay_error("relay failed", RelayError::Publish(SinkError::WriteTimeout));
        assert_eq!(err.code, TIMEOUT);
    }

    #[test]
    fn broker_rejections_are_transport_errors() {
        let err = sink_error("publish failed", SinkError::Broker("queue full".to_string()));
        assert_eq!(err.code, TRANSPORT_ERROR);
    }

    #[test]
    fn decode_failures_are_data_invalid() {
        let err = decode_error(
            "decode failed",
            DecodeError::PayloadTooShort {
                needed: 160,
                actual: 12,
            },
        );
        assert_eq!(err.code, DATA_INVALID);
    }
}
