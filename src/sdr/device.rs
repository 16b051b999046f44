//! Backend-tagged SDR device control.

use std::process::{Child, ChildStdout, Command, Stdio};

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::config::{Config, SdrBackend, CENTER_FREQ_HZ, SAMPLE_RATE};

/// HackRF front-end gains for the transponder band.
const HACKRF_LNA_GAIN: u32 = 32;
const HACKRF_VGA_GAIN: u32 = 24;
const HACKRF_FILTER_BW: u32 = 1_750_000;

/// RTL-SDR IF filter width.
const RTLSDR_TUNER_BW: u32 = 2_000_000;

/// One SDR capture process. The backend tag selects the vendor tool and its
/// sample format; everything downstream sees signed int8 I/Q either way.
pub struct SdrDevice {
    backend: SdrBackend,
    serial: Option<String>,
    gain_db: u32,
    bias_tee: bool,
    child: Option<Child>,
}

impl SdrDevice {
    pub fn new(config: &Config) -> Self {
        Self {
            backend: config.backend,
            serial: config.serial.clone(),
            gain_db: config.gain_db,
            bias_tee: config.bias_tee,
            child: None,
        }
    }

    pub fn backend(&self) -> SdrBackend {
        self.backend
    }

    /// RTL-SDR delivers unsigned offset-128 bytes that need recentering;
    /// HackRF is already signed.
    pub fn samples_are_unsigned(&self) -> bool {
        matches!(self.backend, SdrBackend::Rtlsdr)
    }

    fn command(&self) -> Command {
        match self.backend {
            SdrBackend::Hackrf => {
                let mut cmd = Command::new("hackrf_transfer");
                cmd.arg("-r").arg("-");
                cmd.arg("-f").arg(CENTER_FREQ_HZ.to_string());
                cmd.arg("-s").arg(SAMPLE_RATE.to_string());
                cmd.arg("-b").arg(HACKRF_FILTER_BW.to_string());
                cmd.arg("-l").arg(HACKRF_LNA_GAIN.to_string());
                cmd.arg("-g").arg(HACKRF_VGA_GAIN.to_string());
                if let Some(serial) = &self.serial {
                    cmd.arg("-d").arg(serial);
                }
                if self.bias_tee {
                    cmd.arg("-p").arg("1");
                }
                cmd
            }
            SdrBackend::Rtlsdr => {
                let mut cmd = Command::new("rtl_sdr");
                cmd.arg("-f").arg(CENTER_FREQ_HZ.to_string());
                cmd.arg("-s").arg(SAMPLE_RATE.to_string());
                cmd.arg("-w").arg(RTLSDR_TUNER_BW.to_string());
                cmd.arg("-g").arg(self.gain_db.to_string());
                if let Some(index) = &self.serial {
                    cmd.arg("-d").arg(index);
                }
                if self.bias_tee {
                    cmd.arg("-T");
                }
                cmd.arg("-");
                cmd
            }
        }
    }

    /// Spawn the capture tool and hand back its sample stream.
    pub fn start(&mut self) -> Result<ChildStdout> {
        let mut cmd = self.command();
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        info!("Starting capture: {:?}", cmd);

        let mut child = cmd.spawn().with_context(|| {
            format!(
                "spawning {}; is the capture tool installed and the device connected?",
                match self.backend {
                    SdrBackend::Hackrf => "hackrf_transfer",
                    SdrBackend::Rtlsdr => "rtl_sdr",
                }
            )
        })?;

        let stdout = child
            .stdout
            .take()
            .context("capture tool stdout unavailable")?;

        // forward the tool's own diagnostics
        if let Some(stderr) = child.stderr.take() {
            std::thread::spawn(move || {
                use std::io::BufRead;
                let reader = std::io::BufReader::new(stderr);
                for line in reader.lines().map_while(std::result::Result::ok) {
                    if !line.trim().is_empty() {
                        info!("[sdr] {}", line.trim());
                    }
                }
            });
        }

        self.child = Some(child);
        Ok(stdout)
    }

    pub fn is_streaming(&mut self) -> bool {
        match &mut self.child {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    pub fn stop(&mut self) {
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill() {
                warn!("Failed to stop capture tool: {}", e);
            }
            let _ = child.wait();
        }
    }
}

impl Drop for SdrDevice {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn config(args: &[&str]) -> Config {
        let mut full = vec!["stint-capture"];
        full.extend_from_slice(args);
        Config::try_parse_from(full).unwrap()
    }

    #[test]
    fn test_hackrf_command_line() {
        let device = SdrDevice::new(&config(&[]));
        let cmd = device.command();
        assert_eq!(cmd.get_program().to_string_lossy(), "hackrf_transfer");
        let args: Vec<String> = cmd
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert!(args.windows(2).any(|w| w == ["-f", "5000000"]));
        assert!(args.windows(2).any(|w| w == ["-s", "5000000"]));
        assert!(!device.samples_are_unsigned());
    }

    #[test]
    fn test_rtlsdr_command_line() {
        let device = SdrDevice::new(&config(&["--backend", "rtlsdr", "-g", "28", "-b"]));
        let cmd = device.command();
        assert_eq!(cmd.get_program().to_string_lossy(), "rtl_sdr");
        let args: Vec<String> = cmd
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert!(args.windows(2).any(|w| w == ["-g", "28"]));
        assert!(args.contains(&"-T".to_string()));
        assert_eq!(args.last().unwrap().as_str(), "-");
        assert!(device.samples_are_unsigned());
    }

    #[test]
    fn test_not_streaming_before_start() {
        let mut device = SdrDevice::new(&config(&[]));
        assert!(!device.is_streaming());
    }
}
