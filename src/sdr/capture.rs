//! The SDR producer thread.
//!
//! Reads raw interleaved I/Q from the capture tool, converts to signed int8
//! complex samples and runs the whole DSP pipeline on them, buffer by
//! buffer. This is the only thread touching the detector and symbol reader;
//! it shares nothing else but the aggregator and statistics locks.

use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use anyhow::{Context, Result};
use num_complex::Complex;
use tracing::{info, warn};

use crate::context::ReceiverContext;
use crate::sdr::SdrDevice;

/// Read granularity from the capture tool, in bytes (two per sample).
const READ_CHUNK: usize = 256 * 1024;

pub struct SdrCapture {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    device_streaming: Arc<AtomicBool>,
}

impl SdrCapture {
    /// Start the device and the producer thread driving `context`.
    pub fn start(mut device: SdrDevice, context: ReceiverContext) -> Result<Self> {
        let stdout = device.start()?;
        let running = Arc::new(AtomicBool::new(true));
        let device_streaming = Arc::new(AtomicBool::new(true));

        let thread_running = running.clone();
        let thread_streaming = device_streaming.clone();
        let handle = std::thread::Builder::new()
            .name("sdr-capture".to_string())
            .spawn(move || {
                run_capture(device, stdout, context, thread_running, thread_streaming);
            })
            .context("spawning capture thread")?;

        Ok(Self {
            running,
            handle: Some(handle),
            device_streaming,
        })
    }

    pub fn is_running(&self) -> bool {
        self.device_streaming.load(Ordering::SeqCst) && self.running.load(Ordering::SeqCst)
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for SdrCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_capture(
    mut device: SdrDevice,
    mut stdout: std::process::ChildStdout,
    mut context: ReceiverContext,
    running: Arc<AtomicBool>,
    streaming: Arc<AtomicBool>,
) {
    let unsigned = device.samples_are_unsigned();
    let mut bytes = vec![0u8; READ_CHUNK];
    let mut samples: Vec<Complex<i8>> = Vec::with_capacity(READ_CHUNK / 2);
    // an odd-length read leaves half a sample for the next round
    let mut leftover: Option<u8> = None;

    info!("Capture running");
    while running.load(Ordering::SeqCst) && device.is_streaming() {
        let n = match stdout.read(&mut bytes) {
            Ok(0) => {
                warn!("Capture tool closed its sample stream");
                break;
            }
            Ok(n) => n,
            Err(e) => {
                warn!("Sample read failed: {}", e);
                break;
            }
        };

        samples.clear();
        let mut iter = bytes[..n].iter().copied();
        if let Some(i) = leftover.take() {
            if let Some(q) = iter.next() {
                samples.push(make_sample(i, q, unsigned));
            } else {
                leftover = Some(i);
            }
        }
        loop {
            let Some(i) = iter.next() else { break };
            let Some(q) = iter.next() else {
                leftover = Some(i);
                break;
            };
            samples.push(make_sample(i, q, unsigned));
        }

        context.process_buffer(&samples);
    }

    streaming.store(false, Ordering::SeqCst);
    device.stop();
    info!("Capture stopped");
}

#[inline]
fn make_sample(i: u8, q: u8, unsigned: bool) -> Complex<i8> {
    if unsigned {
        // RTL-SDR: unsigned with DC at 128
        Complex::new((i as i16 - 128) as i8, (q as i16 - 128) as i8)
    } else {
        Complex::new(i as i8, q as i8)
    }
}
