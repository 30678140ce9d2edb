use std::fs;
use std::io::Read;

use panelink_frame::{DecodeStats, Frame, FrameConfig, FrameError, FrameReader};
use serde::Serialize;
use tracing::{debug, info};

use crate::cmd::DecodeArgs;
use crate::exit::{frame_error, io_error, CliResult, DATA_INVALID, SUCCESS};
use crate::output::{print_frames, print_json, FrameOutput, OutputFormat};

#[derive(Serialize)]
struct DecodeOutput {
    frames: Vec<FrameOutput>,
    stats: CaptureStats,
}

#[derive(Serialize)]
struct CaptureStats {
    frames: u64,
    checksum_errors: u64,
    oversized: u64,
    unknown_kind: u64,
    skipped_bytes: u64,
    trailing_bytes: usize,
}

pub fn run(args: DecodeArgs, format: OutputFormat) -> CliResult<i32> {
    let config = FrameConfig {
        max_body_size: args.max_body,
    };
    let (frames, stats, trailing) = match &args.input {
        Some(path) => {
            let file = fs::File::open(path)
                .map_err(|err| io_error(&format!("failed opening {}", path.display()), err))?;
            decode_stream(file, &config)
        }
        None => decode_stream(std::io::stdin().lock(), &config),
    }
    .map_err(|err| frame_error("read failed", err))?;

    info!(
        frames = stats.frames,
        checksum_errors = stats.checksum_errors,
        skipped_bytes = stats.skipped_bytes,
        "capture decoded"
    );

    match format {
        OutputFormat::Json => print_json(&DecodeOutput {
            frames: frames.iter().map(FrameOutput::from).collect(),
            stats: CaptureStats {
                frames: stats.frames,
                checksum_errors: stats.checksum_errors,
                oversized: stats.oversized,
                unknown_kind: stats.unknown_kind,
                skipped_bytes: stats.skipped_bytes,
                trailing_bytes: trailing,
            },
        }),
        other => print_frames(&frames, other),
    }

    if frames.is_empty() {
        return Ok(DATA_INVALID);
    }
    Ok(SUCCESS)
}

/// Pull every valid frame out of `input` until EOF.
fn decode_stream<R: Read>(
    input: R,
    config: &FrameConfig,
) -> Result<(Vec<Frame>, DecodeStats, usize), FrameError> {
    let mut reader = FrameReader::with_config(input, config.clone());
    let mut frames = Vec::new();
    loop {
        match reader.read_frame() {
            Ok(frame) => frames.push(frame),
            Err(FrameError::ConnectionClosed) => break,
            Err(err) => return Err(err),
        }
    }
    if reader.buffered() > 0 {
        debug!(len = reader.buffered(), "capture ends inside a frame candidate");
    }
    Ok((frames, reader.stats(), reader.buffered()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const FRAME: [u8; 11] = [
        0x19, 0x16, 0x00, 0x02, 0x00, 0x01, 0x00, 0xAA, 0xBB, 0x2D, 0xDE,
    ];
    const ACK: [u8; 9] = [0x19, 0x16, 0x00, 0x00, 0x00, 0x07, 0x01, 0xF3, 0xAA];

    #[test]
    fn capture_with_console_noise() {
        let mut capture = b"boot ok\r\n".to_vec();
        capture.extend_from_slice(&FRAME);
        capture.extend_from_slice(b"tick\r\n");
        capture.extend_from_slice(&ACK);

        let (frames, stats, trailing) =
            decode_stream(capture.as_slice(), &FrameConfig::default()).unwrap();
        assert_eq!(frames, vec![Frame::data(1, vec![0xAA, 0xBB]), Frame::ack(7)]);
        assert_eq!(stats.skipped_bytes, 15);
        assert_eq!(trailing, 0);
    }

    #[test]
    fn truncated_capture_reports_trailing_bytes() {
        let (frames, _, trailing) =
            decode_stream(&FRAME[..6], &FrameConfig::default()).unwrap();
        assert!(frames.is_empty());
        assert_eq!(trailing, 6);
    }
}
