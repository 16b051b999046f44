//! stint-capture - SDR receiver and decoder for race-timing transponders.
//!
//! Captures baseband from a HackRF or RTL-SDR, detects and decodes BPSK
//! transponder bursts, aggregates repeated decodes into passing events and
//! publishes text records over TCP.

mod config;
mod context;
mod detect;
mod dsp;
mod frame;
mod passing;
mod publish;
mod reader;
mod report;
mod sdr;
mod stats;
#[cfg(test)]
mod testutil;
mod timebase;
mod transponder;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio::sync::mpsc;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use config::Config;
use context::ReceiverContext;
use passing::PassingAggregator;
use report::{Reporter, POLL_INTERVAL_MS};
use sdr::{SdrCapture, SdrDevice};
use stats::ChannelStats;
use timebase::Timebase;

#[tokio::main]
async fn main() -> Result<()> {
    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .init();

    let config = match Config::try_parse() {
        Ok(config) => config,
        Err(e) => {
            let _ = e.print();
            std::process::exit(1);
        }
    };

    let mut timebase = Timebase::new();
    if config.system_clock {
        timebase.use_system_clock();
    }
    let timebase = Arc::new(timebase);

    let aggregator = Arc::new(PassingAggregator::new());
    let channel_stats = Arc::new(ChannelStats::new(timebase.now()));

    // monitor mode routes per-frame lines through the reporter
    let (monitor_tx, monitor_rx) = if config.monitor {
        let (tx, rx) = crossbeam_channel::bounded(64);
        (Some(tx), Some(rx))
    } else {
        (None, None)
    };

    // best-effort publish sink behind a bounded queue
    let (line_tx, line_rx) = mpsc::channel::<String>(publish::LINE_QUEUE_DEPTH);
    let publish_port = config.port;
    let publisher = tokio::spawn(async move {
        if let Err(e) = publish::run_publisher(publish_port, line_rx).await {
            error!("Publish sink failed: {:#}", e);
        }
    });

    let context = ReceiverContext::new(
        config.detection_threshold(),
        aggregator.clone(),
        channel_stats.clone(),
        timebase.clone(),
        monitor_tx,
    );

    let device = SdrDevice::new(&config);
    info!(
        "Capturing {:?} at {} MS/s, publishing on port {}",
        device.backend(),
        config::SAMPLE_RATE as f32 / 1e6,
        config.port
    );

    let mut capture = match SdrCapture::start(device, context) {
        Ok(capture) => capture,
        Err(e) => {
            error!("SDR start failed: {:#}", e);
            return Err(e);
        }
    };

    let reporter = Reporter::new(aggregator, channel_stats, timebase, monitor_rx);

    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    let mut tick = tokio::time::interval(Duration::from_millis(POLL_INTERVAL_MS));

    loop {
        tokio::select! {
            _ = tick.tick() => {
                for line in reporter.tick() {
                    println!("{line}");
                    // queue full or sink gone: keep going, publishing is
                    // best effort
                    let _ = line_tx.try_send(line);
                }
                if !capture.is_running() {
                    warn!("SDR capture stopped unexpectedly");
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, stopping");
                break;
            }
            _ = sigterm.recv() => {
                info!("Terminated, stopping");
                break;
            }
        }
    }

    capture.stop();

    // a final drain so passings seen just before shutdown still publish
    for line in reporter.tick() {
        println!("{line}");
        let _ = line_tx.try_send(line);
    }

    drop(line_tx);
    let _ = publisher.await;

    info!("Shutdown complete");
    Ok(())
}
