//! BPSK soft demodulator.
//!
//! Symbols are expected on the real axis after amplitude/phase correction:
//! +1 maps to bit 1, -1 to bit 0. The 180-degree ambiguity left by carrier
//! recovery is resolved later by preamble matching, not here.

use num_complex::Complex32;

pub struct BpskSoftDemod {
    last_evm: f32,
}

impl BpskSoftDemod {
    pub fn new() -> Self {
        Self { last_evm: 0.0 }
    }

    pub fn reset(&mut self) {
        self.last_evm = 0.0;
    }

    /// Demodulate one corrected symbol into a hard bit and a soft byte
    /// (0 = confident zero, 128 = undecided, 255 = confident one).
    pub fn demodulate_soft(&mut self, z: Complex32) -> (u8, u8) {
        let hard = if z.re >= 0.0 { 1u8 } else { 0u8 };
        let soft = (128.0 + z.re * 128.0).clamp(0.0, 255.0) as u8;

        let ideal = Complex32::new(if hard == 1 { 1.0 } else { -1.0 }, 0.0);
        self.last_evm = (z - ideal).norm();

        (hard, soft)
    }

    /// Error-vector magnitude of the most recent symbol.
    pub fn demodulator_evm(&self) -> f32 {
        self.last_evm
    }
}
