//! Root-raised-cosine polyphase filterbank.
//!
//! The prototype RRC filter is designed at `SAMPLES_PER_SYMBOL * NUM_FILTERS`
//! taps per symbol and split into `NUM_FILTERS` sub-filters running at the
//! input rate. Executing sub-filter `k` after pushing a given sample yields
//! the matched-filter output at a fractional timing offset of `k / NUM_FILTERS`
//! input samples, which gives the symbol reader 16 candidate sampling phases
//! per symbol to lock onto.

use num_complex::Complex32;
use std::f32::consts::PI;

use crate::config::SAMPLES_PER_SYMBOL;

/// Sub-filters per input sample position.
pub const NUM_FILTERS: usize = 4;

/// Group delay of the bank in symbols.
pub const FILTER_DELAY: usize = 5;

/// RRC excess bandwidth.
const ROLLOFF: f32 = 0.5;

pub struct PolyphaseBank {
    // one tap set per fractional offset, all the same length
    filters: Vec<Vec<f32>>,
    // input delay line, newest sample first
    window: Vec<Complex32>,
}

impl PolyphaseBank {
    pub fn new() -> Self {
        let k = SAMPLES_PER_SYMBOL * NUM_FILTERS;
        let proto = rrc_taps(k, FILTER_DELAY, ROLLOFF);

        // unit DC gain per sub-filter keeps output amplitude comparable to
        // the input, which the amplitude normalisation downstream relies on
        let gain: f32 = proto.iter().sum::<f32>() / NUM_FILTERS as f32;

        let sub_len = proto.len().div_ceil(NUM_FILTERS);
        let mut filters = vec![vec![0.0f32; sub_len]; NUM_FILTERS];
        for (i, &tap) in proto.iter().enumerate() {
            filters[i % NUM_FILTERS][i / NUM_FILTERS] = tap / gain;
        }

        Self {
            filters,
            window: vec![Complex32::new(0.0, 0.0); sub_len],
        }
    }

    pub fn reset(&mut self) {
        self.window.fill(Complex32::new(0.0, 0.0));
    }

    /// Shift one baseband sample into the delay line.
    pub fn push(&mut self, z: Complex32) {
        self.window.rotate_right(1);
        self.window[0] = z;
    }

    /// Matched-filter output for fractional offset `k` (0..NUM_FILTERS).
    pub fn execute(&self, k: usize) -> Complex32 {
        self.filters[k]
            .iter()
            .zip(self.window.iter())
            .map(|(&h, &x)| x * h)
            .sum()
    }
}

/// Root-raised-cosine prototype, `k` samples per symbol, `m` symbols of
/// delay, `2*k*m + 1` taps.
fn rrc_taps(k: usize, m: usize, beta: f32) -> Vec<f32> {
    let len = 2 * k * m + 1;
    let mut taps = Vec::with_capacity(len);
    for i in 0..len {
        let t = (i as f32 - (k * m) as f32) / k as f32;
        taps.push(rrc_at(t, beta));
    }
    taps
}

fn rrc_at(t: f32, beta: f32) -> f32 {
    if t.abs() < 1e-6 {
        return 1.0 - beta + 4.0 * beta / PI;
    }
    // removable singularity at |t| = 1/(4*beta)
    let singular = 1.0 / (4.0 * beta);
    if (t.abs() - singular).abs() < 1e-5 {
        let a = (1.0 + 2.0 / PI) * (PI / (4.0 * beta)).sin();
        let b = (1.0 - 2.0 / PI) * (PI / (4.0 * beta)).cos();
        return beta / 2.0f32.sqrt() * (a + b);
    }
    let num = (PI * t * (1.0 - beta)).sin() + 4.0 * beta * t * (PI * t * (1.0 + beta)).cos();
    let den = PI * t * (1.0 - (4.0 * beta * t).powi(2));
    num / den
}
