use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Subcommand, ValueEnum};
use tlmrelay_frame::{FrameConfig, DEFAULT_END, DEFAULT_PAYLOAD_LEN, DEFAULT_START};
use tlmrelay_relay::{HandoffPolicy, StopHandle};
use tlmrelay_sink::{QoS, DEFAULT_MQTT_PORT, DEFAULT_TOPIC};
use tlmrelay_transport::serial::DEFAULT_BAUD_RATE;

use crate::exit::{CliError, CliResult, INTERNAL, USAGE};
use crate::output::OutputFormat;

pub mod decode;
pub mod listen;
pub mod ports;
pub mod run;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Relay frames from a serial port (or a capture) to the bus.
    Run(RunArgs),
    /// List serial ports.
    Ports(PortsArgs),
    /// Decode a payload or a raw capture with a layout.
    Decode(DecodeArgs),
    /// Bind a bus socket and print published packets.
    Listen(ListenArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Run(args) => run::run(args, format),
        Command::Ports(args) => ports::run(args, format),
        Command::Decode(args) => decode::run(args, format),
        Command::Listen(args) => listen::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

/// Route Ctrl-C to `stop`.
pub fn install_ctrlc_handler(stop: StopHandle) -> CliResult<()> {
    ctrlc::set_handler(move || stop.stop())
        .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}

/// Frame shape shared by `run` and `decode`.
#[derive(Args, Debug, Clone, Copy)]
pub struct FrameArgs {
    /// START marker byte (decimal or 0x hex).
    #[arg(long, value_parser = parse_byte, default_value_t = DEFAULT_START, env = "TLMRELAY_START_BYTE")]
    pub start_byte: u8,
    /// END marker byte (decimal or 0x hex).
    #[arg(long, value_parser = parse_byte, default_value_t = DEFAULT_END, env = "TLMRELAY_END_BYTE")]
    pub end_byte: u8,
    /// Payload bytes per frame.
    #[arg(long, default_value_t = DEFAULT_PAYLOAD_LEN, env = "TLMRELAY_PAYLOAD_LEN")]
    pub payload_len: usize,
}

impl FrameArgs {
    pub fn to_config(self) -> CliResult<FrameConfig> {
        FrameConfig::new(self.start_byte, self.end_byte, self.payload_len)
            .map_err(|err| CliError::new(USAGE, format!("invalid frame parameters: {err}")))
    }
}

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum HandoffArg {
    /// Ingest waits for the publisher; nothing is lost.
    Block,
    /// Ingest replaces a pending packet; replaced packets are counted.
    DropOldest,
}

impl From<HandoffArg> for HandoffPolicy {
    fn from(arg: HandoffArg) -> Self {
        match arg {
            HandoffArg::Block => HandoffPolicy::Block,
            HandoffArg::DropOldest => HandoffPolicy::DropOldest,
        }
    }
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Serial device to read from.
    #[arg(long, value_name = "DEVICE", env = "SERIAL_PORT")]
    pub port: Option<String>,
    /// Serial line speed.
    #[arg(long, env = "SERIAL_BAUDRATE", default_value_t = DEFAULT_BAUD_RATE)]
    pub baud_rate: u32,
    /// Replay a captured byte stream instead of a serial port. Takes precedence over --port.
    #[arg(long, value_name = "FILE")]
    pub replay: Option<PathBuf>,
    /// Bus socket to publish to. Packets go to stdout when unset.
    #[arg(long, value_name = "SOCKET", env = "TLMRELAY_BUS_SOCKET")]
    pub bus: Option<PathBuf>,
    /// Topic packets are published on (bus or broker).
    #[arg(long, env = "MQTT_TOPIC", default_value = DEFAULT_TOPIC)]
    pub topic: String,
    #[command(flatten)]
    pub mqtt: MqttArgs,
    /// Payload layout for diagnostic decoding.
    #[arg(long, value_name = "FILE", env = "TLMRELAY_LAYOUT")]
    pub layout: Option<PathBuf>,
    /// JSON Schema checked against decoded payloads (needs --layout).
    #[arg(long, value_name = "FILE", env = "TLMRELAY_SCHEMA")]
    pub schema: Option<PathBuf>,
    #[command(flatten)]
    pub frame: FrameArgs,
    /// Maximum wait per read before re-checking for shutdown (e.g. 1s, 250ms).
    #[arg(long, value_parser = parse_duration, default_value = "1s")]
    pub read_timeout: Duration,
    /// Log and skip packets the sink rejects instead of exiting.
    #[arg(long)]
    pub continue_on_publish_error: bool,
    /// Read and publish on separate threads.
    #[arg(long)]
    pub threaded: bool,
    /// Hand-off policy between threads (with --threaded).
    #[arg(long, value_enum, default_value = "block")]
    pub handoff: HandoffArg,
}

/// Broker settings for `run`. Usually supplied through `.env`.
#[derive(Args, Debug, Clone)]
pub struct MqttArgs {
    /// MQTT broker to publish to. Packets go to the broker instead of stdout.
    #[arg(long = "mqtt-host", value_name = "HOST", env = "BROKER_ADDRESS")]
    pub host: Option<String>,
    /// MQTT broker port.
    #[arg(id = "mqtt_port", long = "mqtt-port", env = "BROKER_PORT", default_value_t = DEFAULT_MQTT_PORT)]
    pub port: u16,
    /// MQTT username.
    #[arg(long = "mqtt-username", env = "BROKER_USERNAME")]
    pub username: Option<String>,
    /// MQTT password.
    #[arg(long = "mqtt-password", env = "BROKER_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,
    /// MQTT client identifier (default: tlmrelay-<pid>).
    #[arg(long = "mqtt-client-id", env = "MQTT_CLIENT_ID")]
    pub client_id: Option<String>,
    /// MQTT delivery guarantee.
    #[arg(long = "mqtt-qos", value_parser = clap::value_parser!(u8).range(0..=2), default_value_t = 0)]
    pub qos: u8,
}

impl MqttArgs {
    pub fn qos(&self) -> QoS {
        match self.qos {
            0 => QoS::AtMostOnce,
            1 => QoS::AtLeastOnce,
            _ => QoS::ExactlyOnce,
        }
    }
}

#[derive(Args, Debug, Default)]
pub struct PortsArgs {}

#[derive(Args, Debug)]
pub struct DecodeArgs {
    /// Payload file (or capture with --framed).
    pub input: PathBuf,
    /// Payload layout.
    #[arg(long, value_name = "FILE", env = "TLMRELAY_LAYOUT")]
    pub layout: PathBuf,
    /// JSON Schema checked against decoded payloads.
    #[arg(long, value_name = "FILE", env = "TLMRELAY_SCHEMA")]
    pub schema: Option<PathBuf>,
    /// Input is hex text instead of raw bytes.
    #[arg(long)]
    pub hex: bool,
    /// Input is a raw capture; decode every valid frame found in it.
    #[arg(long)]
    pub framed: bool,
    #[command(flatten)]
    pub frame: FrameArgs,
}

#[derive(Args, Debug)]
pub struct ListenArgs {
    /// Socket path to bind.
    pub path: PathBuf,
    /// Only print packets on this topic.
    #[arg(long)]
    pub topic: Option<String>,
    /// Decode payloads with this layout instead of printing them.
    #[arg(long, value_name = "FILE")]
    pub layout: Option<PathBuf>,
    /// Exit after printing N packets.
    #[arg(long)]
    pub count: Option<usize>,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// Parse a byte given as decimal or `0x` hex.
pub fn parse_byte(input: &str) -> Result<u8, String> {
    let input = input.trim();
    let parsed = match input
        .strip_prefix("0x")
        .or_else(|| input.strip_prefix("0X"))
    {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => input.parse(),
    };
    parsed.map_err(|_| format!("expected a byte (0-255 or 0x00-0xFF), got {input:?}"))
}

/// Parse `250ms`, `2s` or a bare number of seconds.
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let input = input.trim();
    let (number, millis) = match input.strip_suffix("ms") {
        Some(number) => (number, true),
        None => (input.strip_suffix('s').unwrap_or(input), false),
    };

    let value: u64 = number
        .parse()
        .map_err(|_| format!("invalid duration: {input:?}"))?;
    if value == 0 {
        return Err("duration must be greater than zero".to_string());
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}
