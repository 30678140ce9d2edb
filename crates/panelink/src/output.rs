use std::fmt::Write as _;
use std::io::{IsTerminal, Write};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use panelink_frame::Frame;
use panelink_protocol::ProtocolStats;
use serde::Serialize;

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
pub struct FrameOutput {
    pub sequence: u16,
    pub kind: &'static str,
    pub body_size: usize,
    pub body: String,
}

impl From<&Frame> for FrameOutput {
    fn from(frame: &Frame) -> Self {
        Self {
            sequence: frame.sequence,
            kind: frame.kind.name(),
            body_size: frame.body.len(),
            body: payload_preview(&frame.body),
        }
    }
}

/// Protocol counters as reported by `send` and `loopback`.
#[derive(Serialize)]
pub struct StatsOutput {
    pub frames_sent: u64,
    pub retransmissions: u64,
    pub delivery_failures: u64,
    pub acks_received: u64,
    pub acks_sent: u64,
    pub delivered: u64,
    pub duplicates_dropped: u64,
    pub stale_dropped: u64,
    pub checksum_errors: u64,
    pub skipped_bytes: u64,
}

impl From<&ProtocolStats> for StatsOutput {
    fn from(stats: &ProtocolStats) -> Self {
        Self {
            frames_sent: stats.frames_sent,
            retransmissions: stats.retransmissions,
            delivery_failures: stats.delivery_failures,
            acks_received: stats.acks_received,
            acks_sent: stats.acks_sent,
            delivered: stats.delivered,
            duplicates_dropped: stats.duplicates_dropped,
            stale_dropped: stats.stale_dropped,
            checksum_errors: stats.decode.checksum_errors,
            skipped_bytes: stats.decode.skipped_bytes,
        }
    }
}

pub fn print_frames(frames: &[Frame], format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out: Vec<FrameOutput> = frames.iter().map(FrameOutput::from).collect();
            print_json(&out);
        }
        OutputFormat::Table => {
            let rows = frames
                .iter()
                .map(|frame| {
                    vec![
                        frame.sequence.to_string(),
                        frame.kind.name().to_string(),
                        frame.body.len().to_string(),
                        payload_preview(&frame.body),
                    ]
                })
                .collect();
            print_table(vec!["SEQ", "KIND", "SIZE", "BODY"], rows);
        }
        OutputFormat::Pretty => {
            for frame in frames {
                println!(
                    "seq={} kind={} size={} body={}",
                    frame.sequence,
                    frame.kind,
                    frame.body.len(),
                    payload_preview(&frame.body)
                );
            }
        }
        OutputFormat::Raw => {
            for frame in frames {
                print_raw(&frame.body);
            }
        }
    }
}

pub fn print_json<T: Serialize>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

pub fn print_table(header: Vec<&str>, rows: Vec<Vec<String>>) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header);
    for row in rows {
        table.add_row(row);
    }
    println!("{table}");
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

pub fn payload_preview(payload: &[u8]) -> String {
    match std::str::from_utf8(payload) {
        Ok(text) => text.to_string(),
        Err(_) => format!("<binary {} bytes>", payload.len()),
    }
}

/// Lowercase hex, bytes joined by `separator`.
pub fn to_hex(bytes: &[u8], separator: &str) -> String {
    let mut out = String::with_capacity(bytes.len() * (2 + separator.len()));
    for (i, byte) in bytes.iter().enumerate() {
        if i > 0 {
            out.push_str(separator);
        }
        let _ = write!(out, "{byte:02x}");
    }
    out
}
