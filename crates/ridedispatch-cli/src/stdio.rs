//! JSON-lines transport over a byte stream
//!
//! Each input line is one `Event`; each output line is one `Delivery`.
//! Addressing is left to whatever sits on the other end of the pipe.

use std::future::Future;

use ridedispatch_core::{Delivery, Event};
use ridedispatch_runtime::RuntimeHandle;
use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tracing::{debug, info, warn};

use crate::error::{CliError, Result};

/// Counters reported when the bridge stops
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BridgeSummary {
    pub events_forwarded: u64,
    pub lines_rejected: u64,
    pub deliveries_written: u64,
    pub deliveries_dropped: u64,
}

/// Forward events from `input` into the runtime and deliveries out to
/// `output` until the input ends or `stop` resolves, then shut the runtime
/// down and flush whatever it emitted while draining.
pub async fn run_bridge<R, W, S>(
    input: R,
    output: &mut W,
    runtime: &mut RuntimeHandle,
    stop: S,
) -> Result<BridgeSummary>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
    S: Future<Output = ()>,
{
    let mut deliveries = runtime
        .take_delivery_receiver()
        .ok_or_else(|| CliError::Config("runtime has no delivery channel".to_string()))?;
    let mut lines = input.lines();
    let mut summary = BridgeSummary::default();
    tokio::pin!(stop);

    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line? {
                    Some(line) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        match serde_json::from_str::<Event>(&line) {
                            Ok(event) => {
                                debug!(kind = event.kind(), "Event received");
                                runtime.send_event(event).await?;
                                summary.events_forwarded += 1;
                            }
                            Err(e) => {
                                warn!("Skipping malformed event line: {}", e);
                                summary.lines_rejected += 1;
                            }
                        }
                    }
                    None => {
                        info!("Input closed");
                        break;
                    }
                }
            }

            delivery = deliveries.recv() => {
                match delivery {
                    Ok(delivery) => {
                        write_delivery(output, &delivery).await?;
                        summary.deliveries_written += 1;
                    }
                    Err(RecvError::Lagged(missed)) => {
                        warn!(missed, "Output fell behind, deliveries dropped");
                        summary.deliveries_dropped += missed;
                    }
                    Err(RecvError::Closed) => break,
                }
            }

            _ = &mut stop => {
                info!("Stop requested");
                break;
            }
        }
    }

    runtime.shutdown().await?;

    loop {
        match deliveries.try_recv() {
            Ok(delivery) => {
                write_delivery(output, &delivery).await?;
                summary.deliveries_written += 1;
            }
            Err(TryRecvError::Lagged(missed)) => {
                summary.deliveries_dropped += missed;
            }
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
        }
    }
    output.flush().await?;

    Ok(summary)
}

async fn write_delivery<W: AsyncWrite + Unpin>(output: &mut W, delivery: &Delivery) -> Result<()> {
    let mut line = serde_json::to_vec(delivery)?;
    line.push(b'\n');
    output.write_all(&line).await?;
    output.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ridedispatch_core::Notification;
    use ridedispatch_runtime::create_test_runtime;

    fn parse_output(output: &[u8]) -> Vec<Delivery> {
        String::from_utf8(output.to_vec())
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_events_in_deliveries_out() {
        let mut runtime = create_test_runtime().await.unwrap();
        let input: &[u8] = br#"{"type":"newRide","identity":"R1","payload":{"from":"A"}}
{"type":"connected","identity":"D1"}
"#;
        let mut output = Vec::new();

        let summary = run_bridge(input, &mut output, &mut runtime, std::future::pending())
            .await
            .unwrap();

        assert_eq!(summary.events_forwarded, 2);
        assert_eq!(summary.lines_rejected, 0);
        let deliveries = parse_output(&output);
        assert_eq!(deliveries.len() as u64, summary.deliveries_written);
        assert!(deliveries
            .iter()
            .any(|d| d.notification.kind() == "rideBroadcast"));
        assert!(deliveries
            .iter()
            .any(|d| d.notification.kind() == "pendingListSnapshot"));
        assert!(!runtime.is_running());
    }

    #[tokio::test]
    async fn test_malformed_lines_are_skipped() {
        let mut runtime = create_test_runtime().await.unwrap();
        let input: &[u8] = b"not json\n\n{\"type\":\"unknown\"}\n{\"type\":\"connected\",\"identity\":\"D1\"}\n";
        let mut output = Vec::new();

        let summary = run_bridge(input, &mut output, &mut runtime, std::future::pending())
            .await
            .unwrap();

        assert_eq!(summary.lines_rejected, 2);
        assert_eq!(summary.events_forwarded, 1);
        let deliveries = parse_output(&output);
        assert_eq!(deliveries.len(), 1);
        assert_eq!(
            deliveries[0].notification,
            Notification::PendingListSnapshot { rides: Vec::new() }
        );
    }

    #[tokio::test]
    async fn test_stop_signal_ends_bridge() {
        let mut runtime = create_test_runtime().await.unwrap();
        let (_keep_open, reader) = tokio::io::duplex(64);
        let mut output = Vec::new();

        let summary = run_bridge(
            tokio::io::BufReader::new(reader),
            &mut output,
            &mut runtime,
            async {},
        )
        .await
        .unwrap();

        assert_eq!(summary, BridgeSummary::default());
        assert!(output.is_empty());
    }
}
