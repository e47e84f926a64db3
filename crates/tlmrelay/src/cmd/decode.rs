use std::fs;

use tlmrelay_decode::{DiagnosticDecoder, LayoutDecoder};
use tlmrelay_frame::{FrameSynchronizer, SyncEvent};
use tracing::{debug, info};

use crate::cmd::DecodeArgs;
use crate::exit::{decode_error, io_error, CliError, CliResult, DATA_INVALID, SUCCESS};
use crate::output::{print_decoded, OutputFormat};

/// Captures and payload files are read whole.
const MAX_INPUT_SIZE: u64 = 64 * 1024 * 1024;

pub fn run(args: DecodeArgs, format: OutputFormat) -> CliResult<i32> {
    let frame = args.frame.to_config()?;
    let mut decoder = LayoutDecoder::from_layout_file(&args.layout)
        .map_err(|err| decode_error("failed to load layout", err))?;
    if let Some(schema) = &args.schema {
        decoder = decoder
            .with_schema_file(schema)
            .map_err(|err| decode_error("failed to load schema", err))?;
    }

    let input = read_input(&args)?;

    if !args.framed {
        let value = decoder
            .decode(&input)
            .map_err(|err| decode_error("decode failed", err))?;
        print_decoded(&value, format);
        return Ok(SUCCESS);
    }

    let mut sync = FrameSynchronizer::new(frame);
    let mut decoded = 0u64;
    for &byte in &input {
        if let SyncEvent::Accepted = sync.process(byte) {
            let Some(packet) = sync.take_packet() else {
                continue;
            };
            let value = decoder
                .decode(&packet)
                .map_err(|err| decode_error(&format!("decode of frame {} failed", decoded + 1), err))?;
            print_decoded(&value, format);
            decoded += 1;
        }
    }

    let stats = sync.stats();
    info!(
        bytes = input.len(),
        frames = decoded,
        rejected = stats.frames_rejected(),
        "capture decoded"
    );
    if decoded == 0 {
        return Err(CliError::new(
            DATA_INVALID,
            format!("no valid frames in {}", args.input.display()),
        ));
    }
    Ok(SUCCESS)
}

fn read_input(args: &DecodeArgs) -> CliResult<Vec<u8>> {
    let context = format!("failed to read {}", args.input.display());
    let metadata = fs::metadata(&args.input).map_err(|err| io_error(&context, err))?;
    if metadata.len() > MAX_INPUT_SIZE {
        return Err(CliError::new(
            DATA_INVALID,
            format!(
                "{} is {} bytes; limit is {MAX_INPUT_SIZE}",
                args.input.display(),
                metadata.len()
            ),
        ));
    }
    let raw = fs::read(&args.input).map_err(|err| io_error(&context, err))?;
    if !args.hex {
        return Ok(raw);
    }

    let text: String = String::from_utf8_lossy(&raw)
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    let bytes = hex::decode(&text)
        .map_err(|err| CliError::new(DATA_INVALID, format!("invalid hex input: {err}")))?;
    debug!(hex_chars = text.len(), bytes = bytes.len(), "hex input decoded");
    Ok(bytes)
}
