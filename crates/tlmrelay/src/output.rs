use std::io::{self, IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;
use tlmrelay_frame::Packet;
use tlmrelay_sink::PacketSink;
use tlmrelay_transport::PortInfo;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct PacketOutput<'a> {
    sequence: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    topic: Option<&'a str>,
    size: usize,
    payload: String,
    timestamp: String,
}

/// Write one packet (or bus envelope payload) in the chosen format.
pub fn write_packet(
    out: &mut impl Write,
    sequence: u64,
    topic: Option<&str>,
    payload: &[u8],
    format: OutputFormat,
) -> io::Result<()> {
    match format {
        OutputFormat::Json => {
            let record = PacketOutput {
                sequence,
                topic,
                size: payload.len(),
                payload: hex::encode(payload),
                timestamp: now_unix_seconds(),
            };
            serde_json::to_writer(&mut *out, &record)?;
            writeln!(out)
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["SEQ", "TOPIC", "SIZE", "PAYLOAD"])
                .add_row(vec![
                    sequence.to_string(),
                    topic.unwrap_or("-").to_string(),
                    payload.len().to_string(),
                    hex::encode(payload),
                ]);
            writeln!(out, "{table}")
        }
        OutputFormat::Pretty => {
            writeln!(
                out,
                "seq={} topic={} size={} payload={}",
                sequence,
                topic.unwrap_or("-"),
                payload.len(),
                hex::encode(payload)
            )
        }
        OutputFormat::Raw => {
            out.write_all(payload)?;
            out.flush()
        }
    }
}

/// Print a decoded payload.
pub fn print_decoded(value: &serde_json::Value, format: OutputFormat) {
    match format {
        OutputFormat::Json | OutputFormat::Raw => println!("{value}"),
        OutputFormat::Pretty => println!(
            "{}",
            serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
        ),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["FIELD", "VALUE"]);
            if let Some(fields) = value.as_object() {
                for (name, field) in fields {
                    table.add_row(vec![name.clone(), field.to_string()]);
                }
            }
            println!("{table}");
        }
    }
}

#[derive(Serialize)]
struct PortOutput<'a> {
    name: &'a str,
    kind: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<&'a str>,
}

pub fn print_ports(ports: &[PortInfo], format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out: Vec<PortOutput<'_>> = ports
                .iter()
                .map(|port| PortOutput {
                    name: &port.name,
                    kind: port.kind,
                    description: port.description.as_deref(),
                })
                .collect();
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "[]".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["PORT", "KIND", "DESCRIPTION"]);
            for port in ports {
                table.add_row(vec![
                    port.name.clone(),
                    port.kind.to_string(),
                    port.description.clone().unwrap_or_default(),
                ]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty | OutputFormat::Raw => {
            for port in ports {
                match &port.description {
                    Some(description) => println!("{} ({}, {description})", port.name, port.kind),
                    None => println!("{} ({})", port.name, port.kind),
                }
            }
        }
    }
}

/// Packet sink that prints every packet to stdout.
pub struct StdoutSink {
    format: OutputFormat,
    sequence: u64,
}

impl StdoutSink {
    pub fn new(format: OutputFormat) -> Self {
        Self {
            format,
            sequence: 0,
        }
    }
}

impl PacketSink for StdoutSink {
    fn publish(&mut self, packet: &Packet) -> tlmrelay_sink::Result<()> {
        self.sequence = self.sequence.saturating_add(1);
        let mut out = io::stdout().lock();
        write_packet(&mut out, self.sequence, None, packet.as_bytes(), self.format)?;
        Ok(())
    }

    fn close(&mut self) -> tlmrelay_sink::Result<()> {
        io::stdout().lock().flush()?;
        Ok(())
    }
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
