use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Subcommand};
use panelink_frame::MAX_BODY_SIZE;
use panelink_protocol::{SendOptions, DEFAULT_RETRY_COUNT};

use crate::exit::{io_error, CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod decode;
pub mod encode;
pub mod listen;
pub mod loopback;
pub mod send;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the wire bytes of a single frame.
    Encode(EncodeArgs),
    /// Extract valid frames from a captured byte dump.
    Decode(DecodeArgs),
    /// Reliably deliver one payload to the display.
    Send(SendArgs),
    /// Print payloads delivered by the display.
    Listen(ListenArgs),
    /// Run a self-test over an in-memory link.
    Loopback(LoopbackArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Encode(args) => encode::run(args, format),
        Command::Decode(args) => decode::run(args, format),
        Command::Send(args) => send::run(args, format),
        Command::Listen(args) => listen::run(args, format),
        Command::Loopback(args) => loopback::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug, Default)]
pub struct PayloadArgs {
    /// Payload as a UTF-8 string.
    #[arg(long, conflicts_with_all = ["hex", "file"])]
    pub data: Option<String>,
    /// Payload as hex (whitespace allowed, e.g. "aa bb").
    #[arg(long, conflicts_with_all = ["data", "file"])]
    pub hex: Option<String>,
    /// Read payload from file.
    #[arg(long, conflicts_with_all = ["data", "hex"])]
    pub file: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct EncodeArgs {
    /// Sequence number.
    #[arg(long, default_value = "1")]
    pub seq: u16,
    /// Encode an ack frame (no body).
    #[arg(long)]
    pub ack: bool,
    #[command(flatten)]
    pub payload: PayloadArgs,
}

#[derive(Args, Debug)]
pub struct DecodeArgs {
    /// Capture file to decode. Reads stdin when omitted.
    pub input: Option<PathBuf>,
    /// Largest body length accepted before a candidate is treated as noise.
    #[arg(long, default_value_t = MAX_BODY_SIZE)]
    pub max_body: usize,
}

#[derive(Args, Debug, Clone)]
pub struct DeliveryArgs {
    /// Time to wait for each ack (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
    /// Transmissions per payload, including the first.
    #[arg(long, default_value_t = DEFAULT_RETRY_COUNT)]
    pub retries: u32,
    /// Pause between a timed-out transmission and the next (e.g. 500ms).
    #[arg(long, default_value = "500ms")]
    pub retry_delay: String,
}

impl DeliveryArgs {
    pub fn send_options(&self) -> CliResult<SendOptions> {
        Ok(SendOptions {
            timeout: parse_duration(&self.timeout)?,
            retry_count: self.retries,
            retry_delay: parse_duration(&self.retry_delay)?,
        })
    }
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Unix socket bridged to the display link (e.g. by socat).
    pub path: PathBuf,
    #[command(flatten)]
    pub payload: PayloadArgs,
    #[command(flatten)]
    pub delivery: DeliveryArgs,
}

#[derive(Args, Debug)]
pub struct ListenArgs {
    /// Unix socket bridged to the display link.
    pub path: PathBuf,
    /// Exit after receiving N payloads.
    #[arg(long)]
    pub count: Option<usize>,
}

#[derive(Args, Debug)]
pub struct LoopbackArgs {
    /// Number of round trips.
    #[arg(long, default_value_t = 3)]
    pub count: usize,
    /// Payload prefix for each message.
    #[arg(long, default_value = "ping")]
    pub data: String,
    /// Corrupt one of every N host writes (0 disables).
    #[arg(long, default_value_t = 0)]
    pub corrupt_every: usize,
    #[command(flatten)]
    pub delivery: DeliveryArgs,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

pub fn resolve_payload(args: &PayloadArgs) -> CliResult<Vec<u8>> {
    if let Some(data) = &args.data {
        return Ok(data.as_bytes().to_vec());
    }
    if let Some(hex) = &args.hex {
        return parse_hex(hex);
    }
    if let Some(path) = &args.file {
        return fs::read(path)
            .map_err(|err| io_error(&format!("failed reading {}", path.display()), err));
    }
    Ok(Vec::new())
}

pub fn parse_hex(input: &str) -> CliResult<Vec<u8>> {
    let digits: Vec<u8> = input
        .bytes()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();
    if digits.len() % 2 != 0 {
        return Err(CliError::new(USAGE, "hex payload has an odd number of digits"));
    }
    digits
        .chunks(2)
        .map(|pair| {
            let text = std::str::from_utf8(pair).unwrap_or("");
            u8::from_str_radix(text, 16)
                .map_err(|_| CliError::new(USAGE, format!("invalid hex byte: {text:?}")))
        })
        .collect()
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        _ => Ok(Duration::from_secs(value)),
    }
}

/// Single-threaded runtime for the async commands.
pub fn runtime() -> CliResult<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|err| io_error("runtime setup failed", err))
}

/// Open the Unix socket that bridges to the display link. The bridge closing
/// the socket ends the session.
#[cfg(unix)]
pub async fn connect(
    path: &std::path::Path,
) -> CliResult<std::sync::Arc<panelink_transport::StreamTransport<tokio::net::UnixStream>>> {
    let stream = tokio::net::UnixStream::connect(path)
        .await
        .map_err(|err| io_error(&format!("connect to {} failed", path.display()), err))?;
    tracing::debug!(path = %path.display(), "link connected");
    Ok(std::sync::Arc::new(
        panelink_transport::StreamTransport::single_session(stream),
    ))
}

#[cfg(not(unix))]
pub fn unsupported_platform() -> CliError {
    CliError::new(
        USAGE,
        "socket links require Unix domain sockets on this platform",
    )
}
