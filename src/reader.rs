//! Per-burst symbol recovery.
//!
//! Once the detector flags a preamble, the reader takes over the sample
//! stream: it resamples the preamble through the polyphase bank to find the
//! best of 16 sampling phases, estimates amplitude, carrier phase and
//! frequency from the squared BPSK symbols, optionally trains the equalizer,
//! and then emits one soft bit per symbol period until the frame has enough
//! bits to cover preamble, payload and filter delay.
//!
//! The preamble frequently starts before the current SDR buffer does; a
//! reserve copy of the previous buffer's tail makes the lookback seamless.

use num_complex::{Complex, Complex32};

use crate::config::SAMPLES_PER_SYMBOL;
use crate::dsp::{BpskSoftDemod, LmsEqualizer, PolyphaseBank, FILTER_DELAY, NUM_FILTERS};
use crate::frame::Frame;

/// Preamble length in symbols.
const PREAMBLE_LEN: usize = 16;

/// Lookback depth in samples, refreshed at every end of buffer.
pub const RESERVE_LEN: usize = PREAMBLE_LEN * SAMPLES_PER_SYMBOL;

/// Candidate sampling phases per symbol.
const GRID_PHASES: usize = SAMPLES_PER_SYMBOL * NUM_FILTERS;

/// Costas loop gains; fixed, tuned for the short burst length.
const COSTAS_FREQ_GAIN: f32 = 0.0025;
const COSTAS_PHASE_GAIN: f32 = 0.05;

/// Train the equalizer only above this symbol amplitude (ADC LSB), weaker
/// bursts would adapt on noise.
const EQ_TRAINING_AMPLITUDE: f32 = 16.0;

pub struct SymbolReader {
    bank: PolyphaseBank,
    equalizer: LmsEqualizer,
    demod: BpskSoftDemod,

    reserve: [Complex<i8>; RESERVE_LEN],

    // burst lock, valid between read_preamble and frame completion
    symsync_sym: usize,
    symsync_bank: usize,
    symbol_scale: f32,
    phase: f32,
    frequency: f32,
    correction: Complex32,
}

impl SymbolReader {
    pub fn new() -> Self {
        Self {
            bank: PolyphaseBank::new(),
            equalizer: LmsEqualizer::new(),
            demod: BpskSoftDemod::new(),
            reserve: [Complex::new(0, 0); RESERVE_LEN],
            symsync_sym: 0,
            symsync_bank: 0,
            symbol_scale: 1.0,
            phase: 0.0,
            frequency: 0.0,
            correction: Complex32::new(1.0, 0.0),
        }
    }

    /// Lock onto the burst whose preamble ends right before sample index
    /// `end`, training timing, amplitude, phase, frequency and (for strong
    /// signals) the equalizer, then append the preamble soft bits to `frame`.
    pub fn read_preamble(
        &mut self,
        frame: &mut Frame,
        offset: Complex<i8>,
        src: &[Complex<i8>],
        end: usize,
    ) {
        self.bank.reset();
        self.equalizer.reset();
        self.demod.reset();

        // gather the preamble samples, reaching into the reserve copy of the
        // previous buffer when the burst started before this one
        let mut pre = [Complex32::new(0.0, 0.0); RESERVE_LEN];
        let start = end as isize - RESERVE_LEN as isize;
        for (i, slot) in pre.iter_mut().enumerate() {
            let idx = start + i as isize;
            let s = if idx < 0 {
                self.reserve[(RESERVE_LEN as isize + idx) as usize]
            } else {
                src[idx as usize]
            };
            *slot = remove_offset(s, offset);
        }

        // resample onto the 16-phase grid
        let mut grid = [[Complex32::new(0.0, 0.0); GRID_PHASES]; PREAMBLE_LEN];
        for sym in 0..PREAMBLE_LEN {
            for pos in 0..SAMPLES_PER_SYMBOL {
                self.bank.push(pre[sym * SAMPLES_PER_SYMBOL + pos]);
                for k in 0..NUM_FILTERS {
                    grid[sym][pos * NUM_FILTERS + k] = self.bank.execute(k);
                }
            }
        }

        // best sampling phase: most energy over the settled symbols
        let mut best = 0;
        let mut peak_energy = 0.0f32;
        for p in 0..GRID_PHASES {
            let energy: f32 = (FILTER_DELAY..PREAMBLE_LEN)
                .map(|sym| grid[sym][p].norm_sqr())
                .sum();
            if energy > peak_energy {
                peak_energy = energy;
                best = p;
            }
        }
        self.symsync_sym = best / NUM_FILTERS;
        self.symsync_bank = best % NUM_FILTERS;

        // amplitude normalisation
        let rms = (peak_energy / PREAMBLE_LEN as f32).sqrt().max(1e-6);
        self.symbol_scale = 1.0 / rms;
        frame.symbol_rms = rms;

        // BPSK phase and frequency: squaring collapses the 180-degree
        // modulation, leaving the carrier at twice the phase
        let settled = PREAMBLE_LEN - FILTER_DELAY;
        let mut rot0 = Complex32::new(0.0, 0.0);
        let mut rot1 = Complex32::new(0.0, 0.0);
        for (i, sym) in (FILTER_DELAY..PREAMBLE_LEN).enumerate() {
            let sq = grid[sym][best] * grid[sym][best];
            if i < settled / 2 {
                rot0 += sq;
            } else {
                rot1 += sq;
            }
        }
        self.phase = 0.5 * (rot0 + rot1).arg();
        self.frequency = (rot1 * rot0.conj()).arg() / settled as f32;
        self.rebuild_correction();

        // decision-directed equalizer training, strong signals only
        if rms > EQ_TRAINING_AMPLITUDE {
            for sym in FILTER_DELAY..PREAMBLE_LEN {
                let z = grid[sym][best] * self.correction;
                self.equalizer.push(z);
                let y = self.equalizer.execute();
                let d = Complex32::new(if y.re >= 0.0 { 1.0 } else { -1.0 }, 0.0);
                self.equalizer.step(d, y);
            }
        }

        // now demodulate the preamble for real
        for sym in 0..PREAMBLE_LEN {
            self.process_symbol(frame, grid[sym][best]);
        }
    }

    /// Produce the next payload soft bit from one symbol period of samples.
    pub fn read_symbol(&mut self, frame: &mut Frame, offset: Complex<i8>, src: &[Complex<i8>]) {
        for (pos, &s) in src.iter().take(SAMPLES_PER_SYMBOL).enumerate() {
            self.bank.push(remove_offset(s, offset));
            if pos == self.symsync_sym {
                let raw = self.bank.execute(self.symsync_bank);
                self.process_symbol(frame, raw);
            }
        }
    }

    /// The frame has all its bits once preamble, payload and the filter
    /// flush-out are covered.
    pub fn is_frame_complete(&self, frame: &Frame) -> bool {
        frame.softbits.len() > frame.preamble_size + frame.payload_size + FILTER_DELAY
    }

    /// Keep the tail of the current buffer for lookback from the next one.
    pub fn update_reserve_buffer(&mut self, src: &[Complex<i8>]) {
        let n = src.len();
        if n >= RESERVE_LEN {
            self.reserve.copy_from_slice(&src[n - RESERVE_LEN..]);
        } else {
            self.reserve.rotate_left(n);
            self.reserve[RESERVE_LEN - n..].copy_from_slice(src);
        }
    }

    fn process_symbol(&mut self, frame: &mut Frame, raw: Complex32) {
        let z = raw * self.correction;

        // Costas-style tracking from the squared corrected symbol, advancing
        // the correction for the next symbol before equalisation
        let err = 0.5 * (z * z).arg();
        self.frequency += COSTAS_FREQ_GAIN * err;
        self.phase += self.frequency + COSTAS_PHASE_GAIN * err;
        self.rebuild_correction();

        self.equalizer.push(z);
        let y = self.equalizer.execute();

        let (_, soft) = self.demod.demodulate_soft(y);
        frame.softbits.push(soft);
        frame.evm_sum += self.demod.demodulator_evm();
    }

    fn rebuild_correction(&mut self) {
        self.correction = Complex32::from_polar(self.symbol_scale, -self.phase);
    }
}

#[inline]
fn remove_offset(s: Complex<i8>, offset: Complex<i8>) -> Complex32 {
    Complex32::new(
        (s.re as i16 - offset.re as i16) as f32,
        (s.im as i16 - offset.im as i16) as f32,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::burst_buffer;
    use crate::transponder::TransponderKind;

    #[test]
    fn test_reserve_tracks_buffer_tail() {
        let mut reader = SymbolReader::new();
        let buf: Vec<Complex<i8>> = (0..200).map(|i| Complex::new(i as i8, 0)).collect();
        reader.update_reserve_buffer(&buf);
        assert_eq!(reader.reserve[0], buf[200 - RESERVE_LEN]);
        assert_eq!(reader.reserve[RESERVE_LEN - 1], buf[199]);

        // short buffers shift instead of overwriting
        let tail: Vec<Complex<i8>> = (0..10).map(|_| Complex::new(-1, -1)).collect();
        reader.update_reserve_buffer(&tail);
        assert_eq!(reader.reserve[RESERVE_LEN - 1], Complex::new(-1, -1));
        assert_eq!(reader.reserve[RESERVE_LEN - 11], buf[199]);
    }

    #[test]
    fn test_completion_length() {
        let reader = SymbolReader::new();
        let mut frame = Frame::new(TransponderKind::OpenStint, 0);
        frame.softbits = vec![128; 16 + 80 + FILTER_DELAY];
        assert!(!reader.is_frame_complete(&frame));
        frame.softbits.push(128);
        assert!(reader.is_frame_complete(&frame));
    }

    #[test]
    fn test_locks_onto_rotated_burst() {
        // constant-one "preamble": after squaring-based phase recovery all
        // demodulated bits must agree (either all ones or, with the BPSK
        // ambiguity, all zeros)
        let bits = vec![1u8; 40];
        let samples = burst_buffer(&bits, 60.0, 0.4, 40);

        let mut reader = SymbolReader::new();
        let mut frame = Frame::new(TransponderKind::OpenStint, 0);

        // the 16th burst symbol is fully received at sample 40 + 64
        let end = 104;
        reader.read_preamble(&mut frame, Complex::new(0, 0), &samples, end);
        let mut idx = end;
        while idx + SAMPLES_PER_SYMBOL <= samples.len() && frame.softbits.len() < 30 {
            reader.read_symbol(&mut frame, Complex::new(0, 0), &samples[idx..]);
            idx += SAMPLES_PER_SYMBOL;
        }

        // skip the filter settling region, then expect consistent decisions
        let settled = &frame.softbits[FILTER_DELAY + 2..28];
        let ones = settled.iter().filter(|&&b| b >= 128).count();
        assert!(
            ones == settled.len() || ones == 0,
            "inconsistent decisions: {settled:?}"
        );
        // amplitude estimate should be in the ballpark of the burst level
        assert!(frame.symbol_rms > 20.0 && frame.symbol_rms < 100.0);
    }
}
