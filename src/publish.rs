//! Line-oriented TCP publish sink.
//!
//! Subscribers connect to the publish port and receive every line emitted
//! from then on, newline terminated. Each connection is served by its own
//! task fed from a broadcast channel, so one peer can never stall the
//! others: a subscriber that reads too slowly first lags (losing old lines),
//! and one whose socket stops draining is dropped once a write exceeds the
//! deadline. Sink trouble never propagates back to the radio side, which
//! only ever pushes into the bounded line channel.

use std::net::SocketAddr;

use anyhow::{Context, Result};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::time::{timeout, Duration};
use tracing::{debug, info, warn};

/// Capacity of the reporter-to-sink line queue.
pub const LINE_QUEUE_DEPTH: usize = 1024;

/// Per-subscriber backlog before old lines are lost.
const SUBSCRIBER_BACKLOG: usize = 256;

/// A subscriber whose socket stays blocked this long is dropped.
const WRITE_DEADLINE: Duration = Duration::from_secs(5);

pub async fn run_publisher(port: u16, mut lines: mpsc::Receiver<String>) -> Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("binding publish port {port}"))?;
    info!("Publishing on tcp://0.0.0.0:{}", port);

    let (fanout_tx, _) = broadcast::channel::<String>(SUBSCRIBER_BACKLOG);

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, addr)) => {
                        debug!("Subscriber connected: {}", addr);
                        // subscribe here so the client sees every line
                        // published after the accept
                        let fanout_rx = fanout_tx.subscribe();
                        tokio::spawn(serve_subscriber(stream, addr, fanout_rx));
                    }
                    Err(e) => warn!("Accept failed: {}", e),
                }
            }
            line = lines.recv() => {
                let Some(line) = line else { break };
                // no subscribers is fine
                let _ = fanout_tx.send(line);
            }
        }
    }

    Ok(())
}

/// Forward broadcast lines to one subscriber until it errors, stalls past
/// the write deadline, or the publisher shuts down.
async fn serve_subscriber(
    mut stream: TcpStream,
    addr: SocketAddr,
    mut fanout_rx: broadcast::Receiver<String>,
) {
    loop {
        match fanout_rx.recv().await {
            Ok(line) => {
                let data = format!("{line}\n");
                match timeout(WRITE_DEADLINE, stream.write_all(data.as_bytes())).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        debug!("Dropping subscriber {}: {}", addr, e);
                        break;
                    }
                    Err(_) => {
                        warn!("Dropping stalled subscriber {}", addr);
                        break;
                    }
                }
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                debug!("Subscriber {} lagged, {} lines lost", addr, n);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
