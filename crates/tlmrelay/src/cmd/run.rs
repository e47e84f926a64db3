use std::fs::File;
use std::path::Path;

use tlmrelay_decode::{DiagnosticDecoder, LayoutDecoder};
use tlmrelay_relay::{
    PublishFailurePolicy, RelayConfig, RelayLoop, RelaySummary, StopHandle, ThreadedRelay,
};
use tlmrelay_sink::{MqttConfig, MqttPublisher, PacketSink};
use tlmrelay_transport::{open_serial, ByteSource, ByteStream, SerialConfig};
use tracing::{debug, info};

use crate::cmd::{install_ctrlc_handler, RunArgs};
use crate::exit::{
    decode_error, io_error, relay_error, sink_error, transport_error, CliError, CliResult,
    SUCCESS, USAGE,
};
use crate::output::{OutputFormat, StdoutSink};

pub fn run(args: RunArgs, format: OutputFormat) -> CliResult<i32> {
    if args.bus.is_some() && args.mqtt.host.is_some() {
        return Err(CliError::new(
            USAGE,
            "--bus and --mqtt-host (BROKER_ADDRESS) are mutually exclusive",
        ));
    }
    let frame = args.frame.to_config()?;
    let decoder = build_decoder(args.layout.as_deref(), args.schema.as_deref())?;
    let source = open_source(&args)?;
    let sink = open_sink(&args, format)?;

    let stop = StopHandle::new();
    install_ctrlc_handler(stop.clone())?;

    let config = RelayConfig {
        read_timeout: args.read_timeout,
        publish_failure: if args.continue_on_publish_error {
            PublishFailurePolicy::Continue
        } else {
            PublishFailurePolicy::Abort
        },
    };

    let result = if args.threaded {
        let mut relay = ThreadedRelay::with_config(source, sink, frame, config)
            .with_handoff_policy(args.handoff.into())
            .with_stop_handle(stop);
        if let Some(decoder) = decoder {
            relay = relay.with_decoder(decoder);
        }
        relay.run()
    } else {
        let mut relay = RelayLoop::with_config(source, sink, frame, config).with_stop_handle(stop);
        if let Some(decoder) = decoder {
            relay = relay.with_decoder(decoder);
        }
        relay.run()
    };

    let summary = result.map_err(|err| relay_error("relay failed", err))?;
    log_handoff(&summary);
    Ok(SUCCESS)
}

fn build_decoder(
    layout: Option<&Path>,
    schema: Option<&Path>,
) -> CliResult<Option<Box<dyn DiagnosticDecoder>>> {
    let Some(layout) = layout else {
        if schema.is_some() {
            return Err(CliError::new(USAGE, "--schema requires --layout"));
        }
        return Ok(None);
    };

    let mut decoder = LayoutDecoder::from_layout_file(layout)
        .map_err(|err| decode_error("failed to load layout", err))?;
    if let Some(schema) = schema {
        decoder = decoder
            .with_schema_file(schema)
            .map_err(|err| decode_error("failed to load schema", err))?;
    }
    info!(
        layout = %decoder.layout().name,
        encoding = ?decoder.layout().encoding,
        fields = decoder.layout().named_fields().count(),
        schema = decoder.has_schema(),
        "diagnostic decoding enabled"
    );
    Ok(Some(Box::new(decoder)))
}

fn open_source(args: &RunArgs) -> CliResult<Box<dyn ByteSource + Send>> {
    if let Some(path) = &args.replay {
        if args.port.is_some() {
            debug!("--replay given; ignoring serial port setting");
        }
        let file = File::open(path)
            .map_err(|err| io_error(&format!("failed to open {}", path.display()), err))?;
        info!(path = %path.display(), "replaying capture");
        return Ok(Box::new(ByteStream::new(file)));
    }

    let Some(port) = &args.port else {
        return Err(CliError::new(
            USAGE,
            "no byte source: pass --port (or SERIAL_PORT) or --replay",
        ));
    };
    let config = SerialConfig::new(port.clone()).with_baud_rate(args.baud_rate);
    let source = open_serial(&config).map_err(|err| transport_error("open failed", err))?;
    Ok(Box::new(source))
}

fn open_sink(args: &RunArgs, format: OutputFormat) -> CliResult<Box<dyn PacketSink>> {
    if let Some(host) = &args.mqtt.host {
        return open_mqtt(host, args);
    }

    let Some(path) = &args.bus else {
        return Ok(Box::new(StdoutSink::new(format)));
    };

    #[cfg(unix)]
    {
        let publisher = tlmrelay_sink::BusPublisher::connect(path, args.topic.clone())
            .map_err(|err| sink_error("bus connect failed", err))?;
        Ok(Box::new(publisher))
    }
    #[cfg(not(unix))]
    {
        Err(CliError::new(
            USAGE,
            format!("bus sockets need Unix domain sockets: {}", path.display()),
        ))
    }
}

fn open_mqtt(host: &str, args: &RunArgs) -> CliResult<Box<dyn PacketSink>> {
    let mut config = MqttConfig::new(host, args.topic.clone())
        .with_port(args.mqtt.port)
        .with_qos(args.mqtt.qos());
    if let Some(client_id) = &args.mqtt.client_id {
        config = config.with_client_id(client_id.clone());
    }
    if let Some(username) = &args.mqtt.username {
        config = config.with_credentials(username.clone(), args.mqtt.password.clone());
    } else if args.mqtt.password.is_some() {
        debug!("broker password given without a username; ignoring it");
    }

    let publisher =
        MqttPublisher::connect(&config).map_err(|err| sink_error("broker setup failed", err))?;
    Ok(Box::new(publisher))
}

fn log_handoff(summary: &RelaySummary) {
    if let Some(handoff) = summary.handoff {
        info!(
            sent = handoff.sent,
            received = handoff.received,
            dropped = handoff.dropped,
            "hand-off totals"
        );
    }
}
