//! Millisecond timebase shared by the DSP pipeline and the reporter.
//!
//! Defaults to monotonic milliseconds since startup, immune to NTP steps.
//! Wall-clock mode exists for deployments that align several receivers.

use std::time::Instant;

pub struct Timebase {
    startup: Instant,
    mode_sysclk: bool,
}

impl Timebase {
    pub fn new() -> Self {
        Self {
            startup: Instant::now(),
            mode_sysclk: false,
        }
    }

    /// Switch to the system clock; call before the pipeline starts.
    pub fn use_system_clock(&mut self) {
        self.mode_sysclk = true;
    }

    pub fn now(&self) -> u64 {
        if self.mode_sysclk {
            chrono::Utc::now().timestamp_millis() as u64
        } else {
            self.startup.elapsed().as_millis() as u64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monotonic_starts_near_zero() {
        let tb = Timebase::new();
        assert!(tb.now() < 1000);
    }

    #[test]
    fn test_never_decreases() {
        let tb = Timebase::new();
        let a = tb.now();
        let b = tb.now();
        assert!(b >= a);
    }

    #[test]
    fn test_system_clock_is_wall_time() {
        let mut tb = Timebase::new();
        tb.use_system_clock();
        // well past 2020-01-01 in ms
        assert!(tb.now() > 1_577_836_800_000);
    }
}
