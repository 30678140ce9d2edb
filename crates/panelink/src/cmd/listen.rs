use serde::Serialize;

use crate::cmd::ListenArgs;
use crate::exit::CliResult;
use crate::output::{payload_preview, print_json, print_raw, OutputFormat};

#[derive(Serialize)]
struct MessageOutput {
    index: usize,
    payload_size: usize,
    payload: String,
}

#[cfg(unix)]
pub fn run(args: ListenArgs, format: OutputFormat) -> CliResult<i32> {
    use panelink_protocol::FrameProtocol;
    use tracing::info;

    use crate::cmd::{connect, runtime};
    use crate::exit::{protocol_error, CliError, SUCCESS, TRANSPORT_ERROR};

    runtime()?.block_on(async move {
        let transport = connect(&args.path).await?;
        let (protocol, mut incoming) = FrameProtocol::start(transport);

        let interrupted = tokio::signal::ctrl_c();
        tokio::pin!(interrupted);

        let mut received = 0usize;
        loop {
            tokio::select! {
                _ = &mut interrupted => {
                    info!(received, "interrupted");
                    break;
                }
                message = incoming.recv() => {
                    let Some(payload) = message else {
                        if args.count.is_some() {
                            return Err(CliError::new(
                                TRANSPORT_ERROR,
                                format!("link closed after {received} message(s)"),
                            ));
                        }
                        break;
                    };
                    print_message(received, &payload, format);
                    received = received.saturating_add(1);
                    if args.count.is_some_and(|count| received >= count) {
                        break;
                    }
                }
            }
        }

        // The ack for the last message may still be queued.
        if !protocol.is_closed() {
            protocol
                .flush()
                .await
                .map_err(|err| protocol_error("flush failed", err))?;
        }
        protocol.shutdown();
        Ok::<_, CliError>(SUCCESS)
    })
}

#[cfg(not(unix))]
pub fn run(args: ListenArgs, _format: OutputFormat) -> CliResult<i32> {
    let _ = args;
    Err(crate::cmd::unsupported_platform())
}

fn print_message(index: usize, payload: &[u8], format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(&MessageOutput {
            index,
            payload_size: payload.len(),
            payload: payload_preview(payload),
        }),
        OutputFormat::Table | OutputFormat::Pretty => println!(
            "#{index} size={} payload={}",
            payload.len(),
            payload_preview(payload)
        ),
        OutputFormat::Raw => print_raw(payload),
    }
}
