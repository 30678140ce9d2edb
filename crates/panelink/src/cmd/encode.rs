use panelink_frame::{FrameKind, FrameWriter};
use serde::Serialize;

use crate::cmd::{resolve_payload, EncodeArgs};
use crate::exit::{frame_error, CliError, CliResult, SUCCESS, USAGE};
use crate::output::{payload_preview, print_json, print_raw, print_table, to_hex, OutputFormat};

#[derive(Serialize)]
struct EncodeOutput {
    sequence: u16,
    kind: &'static str,
    body_size: usize,
    wire_size: usize,
    wire: String,
}

pub fn run(args: EncodeArgs, format: OutputFormat) -> CliResult<i32> {
    let body = resolve_payload(&args.payload)?;
    let kind = if args.ack {
        if !body.is_empty() {
            return Err(CliError::new(USAGE, "ack frames carry no body"));
        }
        FrameKind::Ack
    } else {
        FrameKind::Data
    };

    let wire = encode(args.seq, kind, &body)?;

    match format {
        OutputFormat::Json => print_json(&EncodeOutput {
            sequence: args.seq,
            kind: kind.name(),
            body_size: body.len(),
            wire_size: wire.len(),
            wire: to_hex(&wire, ""),
        }),
        OutputFormat::Table => print_table(
            vec!["SEQ", "KIND", "BODY", "WIRE"],
            vec![vec![
                args.seq.to_string(),
                kind.name().to_string(),
                payload_preview(&body),
                to_hex(&wire, " "),
            ]],
        ),
        OutputFormat::Pretty => println!("{}", to_hex(&wire, " ")),
        OutputFormat::Raw => print_raw(&wire),
    }

    Ok(SUCCESS)
}

fn encode(sequence: u16, kind: FrameKind, body: &[u8]) -> CliResult<Vec<u8>> {
    let mut writer = FrameWriter::new(Vec::new());
    writer
        .send(sequence, kind, body)
        .map_err(|err| frame_error("encode failed", err))?;
    Ok(writer.into_inner())
}
