use std::time::Instant;

use serde::Serialize;

use crate::cmd::{resolve_payload, SendArgs};
use crate::exit::{CliResult, SUCCESS};
use crate::output::{print_json, print_table, OutputFormat, StatsOutput};

#[derive(Serialize)]
struct DeliveryOutput {
    delivered: bool,
    sequence: u16,
    payload_size: usize,
    elapsed_ms: u64,
    stats: StatsOutput,
}

#[cfg(unix)]
pub fn run(args: SendArgs, format: OutputFormat) -> CliResult<i32> {
    use panelink_protocol::{CancellationToken, FrameProtocol, ProtocolConfig};

    use crate::cmd::{connect, runtime};
    use crate::exit::{protocol_error, CliError};

    let options = args.delivery.send_options()?;
    let payload = resolve_payload(&args.payload)?;

    runtime()?.block_on(async move {
        let transport = connect(&args.path).await?;
        let config = ProtocolConfig {
            send: options.clone(),
            ..ProtocolConfig::default()
        };
        let (protocol, _incoming) = FrameProtocol::start_with_config(transport, config);

        let cancel = CancellationToken::new();
        let on_interrupt = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                on_interrupt.cancel();
            }
        });

        let started = Instant::now();
        let result = protocol
            .send_with_cancel(&payload, &options, &cancel)
            .await;
        let stats = protocol.stats();
        protocol.shutdown();

        let sequence = result.map_err(|err| protocol_error("send failed", err))?;
        print_delivery(
            &DeliveryOutput {
                delivered: true,
                sequence,
                payload_size: payload.len(),
                elapsed_ms: started.elapsed().as_millis() as u64,
                stats: StatsOutput::from(&stats),
            },
            format,
        );
        Ok::<_, CliError>(SUCCESS)
    })
}

#[cfg(not(unix))]
pub fn run(args: SendArgs, _format: OutputFormat) -> CliResult<i32> {
    let _ = (args, resolve_payload);
    Err(crate::cmd::unsupported_platform())
}

fn print_delivery(out: &DeliveryOutput, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(out),
        OutputFormat::Table => print_table(
            vec!["SEQ", "SIZE", "ATTEMPTS", "ELAPSED"],
            vec![vec![
                out.sequence.to_string(),
                out.payload_size.to_string(),
                out.stats.frames_sent.to_string(),
                format!("{}ms", out.elapsed_ms),
            ]],
        ),
        OutputFormat::Pretty | OutputFormat::Raw => println!(
            "delivered seq={} size={} attempts={} elapsed={}ms",
            out.sequence, out.payload_size, out.stats.frames_sent, out.elapsed_ms
        ),
    }
}
