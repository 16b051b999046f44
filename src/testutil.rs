//! Synthetic baseband generation for tests.

use num_complex::{Complex, Complex32};

use crate::config::SAMPLES_PER_SYMBOL;
use crate::transponder::{transponder_props, TransponderKind};

/// BPSK-modulate `bits` onto a rotated carrier with rectangular pulses,
/// `SAMPLES_PER_SYMBOL` samples per bit, quantised to the int8 sample format
/// the SDR adapters deliver.
pub fn rect_burst(bits: &[u8], amplitude: f32, carrier_phase: f32) -> Vec<Complex<i8>> {
    let rot = Complex32::from_polar(amplitude, carrier_phase);
    let mut out = Vec::with_capacity(bits.len() * SAMPLES_PER_SYMBOL);
    for &bit in bits {
        let sym = if bit != 0 { rot } else { -rot };
        for _ in 0..SAMPLES_PER_SYMBOL {
            out.push(quantize(sym));
        }
    }
    out
}

/// A complete burst for `kind`: sync word, 80 payload soft bits hardened to
/// the air format, and a short alternating tail that flushes the receive
/// filters.
pub fn burst_bits(kind: TransponderKind, payload_soft: &[u8]) -> Vec<u8> {
    let word = transponder_props(kind).bpsk_preamble;
    let mut bits: Vec<u8> = (0..16).map(|i| ((word >> (15 - i)) & 1) as u8).collect();
    bits.extend(payload_soft.iter().map(|&s| (s >= 128) as u8));
    bits.extend([1, 0, 1, 0, 1, 0, 1, 0, 1, 0, 1, 0]);
    bits
}

/// Silence-padded sample buffer containing one burst at `lead` samples
/// (multiple of the symbol period keeps the test math simple).
pub fn burst_buffer(bits: &[u8], amplitude: f32, carrier_phase: f32, lead: usize) -> Vec<Complex<i8>> {
    assert_eq!(lead % SAMPLES_PER_SYMBOL, 0);
    let mut buf = vec![Complex::new(0, 0); lead];
    buf.extend(rect_burst(bits, amplitude, carrier_phase));
    buf.extend(std::iter::repeat(Complex::new(0i8, 0i8)).take(80));
    buf
}

fn quantize(z: Complex32) -> Complex<i8> {
    Complex::new(
        z.re.round().clamp(-128.0, 127.0) as i8,
        z.im.round().clamp(-128.0, 127.0) as i8,
    )
}
