use crate::cmd::ListenArgs;
use crate::exit::CliResult;
use crate::output::OutputFormat;

/// Longest Ctrl-C waits while idle in accept or read.
#[cfg(unix)]
const STOP_CHECK_INTERVAL: std::time::Duration = std::time::Duration::from_millis(200);

#[cfg(unix)]
pub fn run(args: ListenArgs, format: OutputFormat) -> CliResult<i32> {
    use std::io;

    use tlmrelay_decode::{DiagnosticDecoder, LayoutDecoder};
    use tlmrelay_relay::StopHandle;
    use tlmrelay_sink::{BusReader, SinkError};
    use tlmrelay_transport::BusSocket;
    use tracing::{info, warn};

    use crate::cmd::install_ctrlc_handler;
    use crate::exit::{decode_error, io_error, sink_error, transport_error, SUCCESS};
    use crate::output::{print_decoded, write_packet};

    let decoder = args
        .layout
        .as_deref()
        .map(LayoutDecoder::from_layout_file)
        .transpose()
        .map_err(|err| decode_error("failed to load layout", err))?;
    // Handler first: the socket path appearing means Ctrl-C is handled.
    let stop = StopHandle::new();
    install_ctrlc_handler(stop.clone())?;

    let socket = BusSocket::bind(&args.path).map_err(|err| transport_error("bind failed", err))?;
    info!(path = %socket.path().display(), "listening for publishers");

    let mut printed = 0u64;

    'accept: while !stop.is_stopped() {
        let stream = match socket.accept_timeout(STOP_CHECK_INTERVAL) {
            Ok(Some(stream)) => stream,
            Ok(None) => continue,
            Err(err) => return Err(transport_error("accept failed", err)),
        };
        stream
            .set_read_timeout(Some(STOP_CHECK_INTERVAL))
            .map_err(|err| io_error("socket setup failed", err))?;
        info!("publisher connected");

        let mut reader = BusReader::new(stream);
        loop {
            if stop.is_stopped() {
                break 'accept;
            }
            let envelope = match reader.read_envelope() {
                Ok(Some(envelope)) => envelope,
                Ok(None) => break,
                Err(SinkError::Io(err))
                    if matches!(err.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) =>
                {
                    continue;
                }
                Err(SinkError::ConnectionClosed) => {
                    warn!("publisher went away mid-envelope");
                    break;
                }
                Err(err) => return Err(sink_error("receive failed", err)),
            };

            if args.topic.as_ref().is_some_and(|topic| *topic != envelope.topic) {
                continue;
            }

            printed = printed.saturating_add(1);
            match &decoder {
                Some(decoder) => match decoder.decode(&envelope.payload) {
                    Ok(value) => print_decoded(&value, format),
                    Err(err) => warn!(error = %err, topic = %envelope.topic, "decode failed"),
                },
                None => write_packet(
                    &mut io::stdout().lock(),
                    printed,
                    Some(envelope.topic.as_str()),
                    &envelope.payload,
                    format,
                )
                .map_err(|err| io_error("write failed", err))?,
            }

            if args.count.is_some_and(|count| printed >= count as u64) {
                return Ok(SUCCESS);
            }
        }
        info!(printed, "publisher disconnected");
    }

    info!(printed, "listener stopped");
    Ok(SUCCESS)
}

#[cfg(not(unix))]
pub fn run(args: ListenArgs, _format: OutputFormat) -> CliResult<i32> {
    use crate::exit::{CliError, USAGE};

    Err(CliError::new(
        USAGE,
        format!("bus sockets need Unix domain sockets: {}", args.path.display()),
    ))
}
