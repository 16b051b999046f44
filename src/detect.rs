//! Preamble-matching frame detector.
//!
//! Consumes the sample stream one symbol period at a time and correlates the
//! last 16 symbols against both known sync words, separately for each of the
//! four sample phases inside a symbol. Between bursts it keeps running
//! estimates of the DC offset and the noise power, which the rest of the
//! pipeline and the channel statistics reuse.

use num_complex::Complex;

use crate::config::SAMPLES_PER_SYMBOL;
use crate::transponder::{transponder_props, TransponderKind};

/// Sync word length in symbols; also the correlation window depth.
pub const PREAMBLE_BITS: usize = 16;

/// Commit DC/noise estimates only after this many quiet samples.
const STATS_UPDATE_THRESHOLD: u32 = 1 << 12;

/// A 16-bit sync word expanded to +/-1 rows, one row per circular-buffer
/// rotation, so the correlator never has to unroll the ring.
struct PreamblePattern {
    pattern: [[i8; PREAMBLE_BITS]; PREAMBLE_BITS],
}

impl PreamblePattern {
    fn new(word: u16) -> Self {
        let mut pattern = [[0i8; PREAMBLE_BITS]; PREAMBLE_BITS];
        for i in 0..PREAMBLE_BITS {
            pattern[0][i] = if (word << i) & 0x8000 != 0 { 1 } else { -1 };
        }
        for r in 1..PREAMBLE_BITS {
            pattern[r][0] = pattern[r - 1][PREAMBLE_BITS - 1];
            for j in 1..PREAMBLE_BITS {
                pattern[r][j] = pattern[r - 1][j - 1];
            }
        }
        Self { pattern }
    }

    fn dot(&self, buffer: &[i8; PREAMBLE_BITS], head: usize) -> i32 {
        self.pattern[head]
            .iter()
            .zip(buffer.iter())
            .map(|(&p, &x)| p as i32 * x as i32)
            .sum()
    }
}

/// Circular buffer of the last 16 symbols seen at one sample phase, with the
/// summed magnitude-squared maintained incrementally.
struct PhaseBuffer {
    head: usize,
    buff_i: [i8; PREAMBLE_BITS],
    buff_q: [i8; PREAMBLE_BITS],
    buff_e: [u32; PREAMBLE_BITS],
    window_energy: u32,
}

impl PhaseBuffer {
    fn new() -> Self {
        Self {
            head: 0,
            buff_i: [0; PREAMBLE_BITS],
            buff_q: [0; PREAMBLE_BITS],
            buff_e: [0; PREAMBLE_BITS],
            window_energy: 0,
        }
    }

    fn push(&mut self, symbol: Complex<i8>, energy: u32) {
        self.window_energy += energy;
        self.window_energy -= self.buff_e[self.head];
        self.buff_e[self.head] = energy;
        self.buff_i[self.head] = symbol.re;
        self.buff_q[self.head] = symbol.im;
        self.head = (self.head + 1) % PREAMBLE_BITS;
    }

    /// Normalised correlation score: roughly 1.0 when the buffer holds
    /// exactly the sync word at its own amplitude.
    fn match_preamble(&self, sync: &PreamblePattern) -> f32 {
        if self.window_energy == 0 {
            return 0.0;
        }
        let di = sync.dot(&self.buff_i, self.head);
        let dq = sync.dot(&self.buff_q, self.head);
        let c2 = di * di + dq * dq;
        c2 as f32 / (self.window_energy as f32 * PREAMBLE_BITS as f32)
    }
}

pub struct FrameDetector {
    threshold: f32,
    p_openstint: PreamblePattern,
    p_legacy: PreamblePattern,
    buffers: [PhaseBuffer; SAMPLES_PER_SYMBOL],

    // stream statistics
    offset: Complex<i8>,
    variance: f32,

    // accumulators toward the next statistics commit
    s1: Complex<i32>,
    s2: u64,
    n: u32,
}

impl FrameDetector {
    pub fn new(threshold: f32) -> Self {
        Self {
            threshold,
            p_openstint: PreamblePattern::new(
                transponder_props(TransponderKind::OpenStint).bpsk_preamble,
            ),
            p_legacy: PreamblePattern::new(transponder_props(TransponderKind::Legacy).bpsk_preamble),
            buffers: [
                PhaseBuffer::new(),
                PhaseBuffer::new(),
                PhaseBuffer::new(),
                PhaseBuffer::new(),
            ],
            offset: Complex::new(0, 0),
            variance: 0.0,
            s1: Complex::new(0, 0),
            s2: 0,
            n: 0,
        }
    }

    /// Process one symbol period of samples. Returns the matched transponder
    /// kind when a preamble crosses the threshold; OpenStint is tested first
    /// and wins ties.
    pub fn process_baseband(&mut self, samples: &[Complex<i8>]) -> Option<TransponderKind> {
        debug_assert!(samples.len() >= SAMPLES_PER_SYMBOL);

        for (i, &s) in samples.iter().take(SAMPLES_PER_SYMBOL).enumerate() {
            let re = (s.re as i16 - self.offset.re as i16).clamp(-128, 127) as i8;
            let im = (s.im as i16 - self.offset.im as i16).clamp(-128, 127) as i8;
            let mag2 = (re as i32 * re as i32 + im as i32 * im as i32) as u32;
            self.buffers[i].push(Complex::new(re, im), mag2);

            // sample the first element of each window for the statistics
            if i == 0 {
                self.s1 += Complex::new(s.re as i32, s.im as i32);
                self.s2 += mag2 as u64;
                self.n += 1;
            }
        }

        let best = self.peak_buffer();
        let buffer = &self.buffers[best];
        if buffer.match_preamble(&self.p_openstint) > self.threshold {
            return Some(TransponderKind::OpenStint);
        }
        if buffer.match_preamble(&self.p_legacy) > self.threshold {
            return Some(TransponderKind::Legacy);
        }
        None
    }

    fn peak_buffer(&self) -> usize {
        let mut best = 0;
        for i in 1..SAMPLES_PER_SYMBOL {
            if self.buffers[i].window_energy > self.buffers[best].window_energy {
                best = i;
            }
        }
        best
    }

    /// Commit the DC-offset and noise estimates if enough quiet samples
    /// accumulated. Callers skip this for buffers that contained a frame,
    /// since burst energy corrupts both estimates.
    pub fn update_statistics(&mut self) {
        if self.n > STATS_UPDATE_THRESHOLD {
            self.offset = Complex::new(
                (self.s1.re / self.n as i32).clamp(-128, 127) as i8,
                (self.s1.im / self.n as i32).clamp(-128, 127) as i8,
            );
            self.variance = self.s2 as f32 / (self.n - 1) as f32;
            self.reset_statistics_counters();
        }
    }

    pub fn reset_statistics_counters(&mut self) {
        self.s1 = Complex::new(0, 0);
        self.s2 = 0;
        self.n = 0;
    }

    /// Mean symbol energy of the strongest sample phase.
    pub fn symbol_energy(&self) -> f32 {
        self.buffers[self.peak_buffer()].window_energy as f32 / PREAMBLE_BITS as f32
    }

    /// Noise power from the last committed variance estimate.
    pub fn noise_energy(&self) -> f32 {
        self.variance
    }

    pub fn dc_offset(&self) -> Complex<i8> {
        self.offset
    }

    #[cfg(test)]
    fn stats_counters(&self) -> (Complex<i32>, u64, u32) {
        (self.s1, self.s2, self.n)
    }
}
