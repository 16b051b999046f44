//! Three-tap LMS equalizer.
//!
//! Short bursts leave no room for blind convergence, so the equalizer is
//! trained decision-directed over the preamble (strong signals only) and then
//! keeps adapting symbol by symbol during the payload.

use num_complex::Complex32;

const NUM_TAPS: usize = 3;

/// Adaptation bandwidth, w += mu * e * conj(x).
const LMS_BANDWIDTH: f32 = 1.0 / 64.0;

pub struct LmsEqualizer {
    taps: [Complex32; NUM_TAPS],
    window: [Complex32; NUM_TAPS],
}

impl LmsEqualizer {
    pub fn new() -> Self {
        let mut eq = Self {
            taps: [Complex32::new(0.0, 0.0); NUM_TAPS],
            window: [Complex32::new(0.0, 0.0); NUM_TAPS],
        };
        eq.reset();
        eq
    }

    /// Identity response: unit center tap.
    pub fn reset(&mut self) {
        self.taps = [Complex32::new(0.0, 0.0); NUM_TAPS];
        self.taps[NUM_TAPS / 2] = Complex32::new(1.0, 0.0);
        self.window = [Complex32::new(0.0, 0.0); NUM_TAPS];
    }

    /// Shift one symbol into the delay line.
    pub fn push(&mut self, z: Complex32) {
        self.window.rotate_right(1);
        self.window[0] = z;
    }

    /// Filter output for the current window.
    pub fn execute(&self) -> Complex32 {
        self.taps
            .iter()
            .zip(self.window.iter())
            .map(|(t, x)| t * x)
            .sum()
    }

    /// One LMS step toward `desired` given the filter output `actual`.
    pub fn step(&mut self, desired: Complex32, actual: Complex32) {
        let err = desired - actual;
        for (tap, x) in self.taps.iter_mut().zip(self.window.iter()) {
            *tap += LMS_BANDWIDTH * err * x.conj();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_passthrough() {
        let mut eq = LmsEqualizer::new();
        eq.push(Complex32::new(1.0, 0.0));
        eq.push(Complex32::new(-1.0, 0.0));
        eq.push(Complex32::new(1.0, 0.0));
        // center tap sees the middle symbol
        let y = eq.execute();
        assert!((y.re - -1.0).abs() < 1e-6);
    }

    #[test]
    fn test_converges_on_gain_error() {
        // channel applies a flat 0.5 gain; decision-directed training should
        // drive the output back toward +/-1
        let mut eq = LmsEqualizer::new();
        let symbols: Vec<f32> = (0..500).map(|i| if i % 3 == 0 { -1.0 } else { 1.0 }).collect();
        let mut last_err = f32::MAX;
        for &s in &symbols {
            eq.push(Complex32::new(0.5 * s, 0.0));
            let y = eq.execute();
            let d = Complex32::new(if y.re >= 0.0 { 1.0 } else { -1.0 }, 0.0);
            eq.step(d, y);
            last_err = (d - y).norm();
        }
        assert!(last_err < 0.1);
    }
}
