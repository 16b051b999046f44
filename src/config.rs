//! Radio constants and runtime configuration.

use clap::{Parser, ValueEnum};

/// Transponder symbol rate in symbols per second.
pub const SYMBOL_RATE: u32 = 1_250_000;

/// Baseband oversampling factor.
pub const SAMPLES_PER_SYMBOL: usize = 4;

/// Complex sample rate delivered by the SDR adapters.
pub const SAMPLE_RATE: u32 = SYMBOL_RATE * SAMPLES_PER_SYMBOL as u32;

/// Center frequency of the transponder band.
pub const CENTER_FREQ_HZ: u64 = 5_000_000;

/// Full-scale amplitude of the signed 8-bit ADC path, used as the dB
/// reference for RSSI and noise-floor figures.
pub const ADC_FULL_SCALE: f32 = 127.0;

pub const DEFAULT_PUBLISH_PORT: u16 = 5556;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SdrBackend {
    Hackrf,
    Rtlsdr,
}

/// Command line configuration. The short options mirror the historical
/// receiver tools, so existing wrapper scripts keep working.
#[derive(Debug, Parser)]
#[command(name = "stint-capture", version)]
#[command(about = "SDR receiver and decoder for race-timing transponders")]
pub struct Config {
    /// SDR backend to capture from
    #[arg(long, value_enum, default_value_t = SdrBackend::Hackrf)]
    pub backend: SdrBackend,

    /// Publish TCP port
    #[arg(short = 'p', default_value_t = DEFAULT_PUBLISH_PORT)]
    pub port: u16,

    /// Monitor mode: print every received frame
    #[arg(short = 'm')]
    pub monitor: bool,

    /// Use the system clock as the timebase (beware of NTP jumps)
    #[arg(short = 't')]
    pub system_clock: bool,

    /// Serial number of the desired device (default: first found)
    #[arg(short = 'd')]
    pub serial: Option<String>,

    /// Tuner gain in dB (RTL-SDR only; HackRF uses fixed LNA/VGA gains)
    #[arg(short = 'g', default_value_t = 20)]
    pub gain_db: u32,

    /// Enable bias-tee antenna power
    #[arg(short = 'b')]
    pub bias_tee: bool,
}

impl Config {
    /// Preamble-match threshold tuned per backend front end.
    pub fn detection_threshold(&self) -> f32 {
        match self.backend {
            SdrBackend::Hackrf => 0.90,
            SdrBackend::Rtlsdr => 0.84,
        }
    }
}
