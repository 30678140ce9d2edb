use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use panelink_protocol::{FrameProtocol, ProtocolConfig};
use panelink_transport::{MemoryTransport, Transport};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::cmd::{runtime, LoopbackArgs};
use crate::exit::{protocol_error, CliError, CliResult, FAILURE, SUCCESS};
use crate::output::{print_json, print_table, OutputFormat, StatsOutput};

/// Wraps a link and flips a checksum bit in every `every`-th write.
struct CorruptingLink<T> {
    inner: T,
    every: usize,
    writes: AtomicUsize,
}

impl<T> CorruptingLink<T> {
    fn new(inner: T, every: usize) -> Self {
        Self {
            inner,
            every,
            writes: AtomicUsize::new(0),
        }
    }
}

impl<T: Transport> Transport for CorruptingLink<T> {
    async fn read(&self, buf: &mut [u8]) -> panelink_transport::Result<usize> {
        self.inner.read(buf).await
    }

    async fn write_all(&self, buf: &[u8]) -> panelink_transport::Result<()> {
        let count = self.writes.fetch_add(1, Ordering::Relaxed) + 1;
        if self.every == 0 || count % self.every != 0 || buf.is_empty() {
            return self.inner.write_all(buf).await;
        }
        let mut damaged = buf.to_vec();
        let last = damaged.len() - 1;
        damaged[last] ^= 0x01;
        debug!(write = count, len = buf.len(), "corrupting outbound write");
        self.inner.write_all(&damaged).await
    }

    fn reconnects(&self) -> watch::Receiver<u64> {
        self.inner.reconnects()
    }
}

#[derive(Serialize)]
struct LoopbackOutput {
    round_trips: usize,
    elapsed_ms: u64,
    host: StatsOutput,
    device: StatsOutput,
}

pub fn run(args: LoopbackArgs, format: OutputFormat) -> CliResult<i32> {
    let options = args.delivery.send_options()?;

    runtime()?.block_on(async move {
        let (host_link, device_link) = MemoryTransport::pair();
        let config = ProtocolConfig {
            send: options,
            ..ProtocolConfig::default()
        };
        let host_link = Arc::new(CorruptingLink::new(host_link, args.corrupt_every));
        let (host, mut host_incoming) = FrameProtocol::start_with_config(host_link, config.clone());
        let (device, mut device_incoming) =
            FrameProtocol::start_with_config(Arc::new(device_link), config);

        let started = Instant::now();
        for round in 0..args.count {
            let payload = format!("{}:{round}", args.data).into_bytes();

            host.send(&payload)
                .await
                .map_err(|err| protocol_error("host send failed", err))?;
            let received = device_incoming
                .recv()
                .await
                .ok_or_else(|| CliError::new(FAILURE, "device side closed"))?;
            if received != payload {
                return Err(CliError::new(
                    FAILURE,
                    format!("round {round}: device received a different payload"),
                ));
            }

            device
                .send(&received)
                .await
                .map_err(|err| protocol_error("device send failed", err))?;
            let echoed = host_incoming
                .recv()
                .await
                .ok_or_else(|| CliError::new(FAILURE, "host side closed"))?;
            if echoed != payload {
                return Err(CliError::new(
                    FAILURE,
                    format!("round {round}: host received a different echo"),
                ));
            }
            debug!(round, "echo verified");
        }

        let out = LoopbackOutput {
            round_trips: args.count,
            elapsed_ms: started.elapsed().as_millis() as u64,
            host: StatsOutput::from(&host.stats()),
            device: StatsOutput::from(&device.stats()),
        };
        host.shutdown();
        device.shutdown();
        info!(round_trips = out.round_trips, "loopback passed");

        print_loopback(&out, format);
        Ok::<_, CliError>(SUCCESS)
    })
}

fn print_loopback(out: &LoopbackOutput, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(out),
        OutputFormat::Table => {
            let row = |side: &str, stats: &StatsOutput| {
                vec![
                    side.to_string(),
                    stats.frames_sent.to_string(),
                    stats.retransmissions.to_string(),
                    stats.delivered.to_string(),
                    stats.duplicates_dropped.to_string(),
                    stats.checksum_errors.to_string(),
                ]
            };
            print_table(
                vec!["SIDE", "SENT", "RETRIES", "DELIVERED", "DUPLICATES", "CRC ERRORS"],
                vec![row("host", &out.host), row("device", &out.device)],
            );
        }
        OutputFormat::Pretty | OutputFormat::Raw => println!(
            "loopback ok round_trips={} elapsed={}ms host_retries={} device_retries={}",
            out.round_trips, out.elapsed_ms, out.host.retransmissions, out.device.retransmissions
        ),
    }
}
