//! SDR sample sources.
//!
//! The vendor radios are driven through their stock capture tools
//! (`hackrf_transfer`, `rtl_sdr`) as subprocesses streaming raw interleaved
//! I/Q to stdout; the capture thread converts to signed int8 samples and
//! feeds the receiver context. This keeps the vendor libraries entirely out
//! of process while preserving their full throughput.

mod capture;
mod device;

pub use capture::SdrCapture;
pub use device::SdrDevice;
