//! Rolling channel statistics, reported on a fixed cadence.

use std::sync::Mutex;

use num_complex::Complex;

use crate::config::ADC_FULL_SCALE;

/// Status reporting cadence in ms.
pub const REPORTING_PERIOD_MS: u64 = 5000;

#[derive(Default)]
struct Inner {
    frames_received: u32,
    frames_processed: u32,
    dc_offset: Complex<i8>,
    noise_power: f32,
    last_reset: u64,
}

/// Shared between the SDR producer (frame and channel updates) and the
/// reporter (periodic read-and-reset).
pub struct ChannelStats {
    inner: Mutex<Inner>,
}

impl ChannelStats {
    pub fn new(now: u64) -> Self {
        Self {
            inner: Mutex::new(Inner {
                last_reset: now,
                ..Inner::default()
            }),
        }
    }

    /// Count a completed frame; `processed` marks a successful decode.
    pub fn register_frame(&self, processed: bool) {
        let mut inner = self.inner.lock().unwrap();
        inner.frames_received += 1;
        if processed {
            inner.frames_processed += 1;
        }
    }

    /// Save the detector's channel estimates from a quiet buffer.
    pub fn save_channel_characteristics(&self, dc_offset: Complex<i8>, noise_power: f32) {
        let mut inner = self.inner.lock().unwrap();
        inner.dc_offset = dc_offset;
        inner.noise_power = noise_power;
    }

    pub fn reporting_due(&self, now: u64) -> bool {
        let inner = self.inner.lock().unwrap();
        now >= inner.last_reset + REPORTING_PERIOD_MS
    }

    pub fn reset(&self, now: u64) {
        let mut inner = self.inner.lock().unwrap();
        inner.frames_received = 0;
        inner.frames_processed = 0;
        inner.last_reset = now;
    }

    /// Body of the status line: noise floor (dB full scale), DC offset
    /// magnitude, frames received and processed.
    ///
    /// The noise power is a variance while the full-scale reference is a
    /// voltage, hence 10*log10 against 20*log10.
    pub fn to_report(&self) -> String {
        let inner = self.inner.lock().unwrap();
        let noise_floor =
            10.0 * inner.noise_power.max(1e-6).log10() - 20.0 * ADC_FULL_SCALE.log10();
        let dc = ((inner.dc_offset.re as f32).powi(2) + (inner.dc_offset.im as f32).powi(2)).sqrt();
        format!(
            "{:.1} {:.1} {} {}",
            noise_floor, dc, inner.frames_received, inner.frames_processed
        )
    }
}
