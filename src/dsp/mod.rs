//! Baseband DSP primitives used by the symbol reader and payload decoders.
//!
//! The pipeline owns exactly one instance of each primitive per receive
//! stream; none of them implements `Clone` or `Default`, state is reset
//! explicitly between bursts.

mod crc8;
mod demod;
mod equalizer;
mod polyphase;
mod viterbi;

pub use crc8::{crc8, crc8_validate};
pub use demod::BpskSoftDemod;
pub use equalizer::LmsEqualizer;
pub use polyphase::{PolyphaseBank, FILTER_DELAY, NUM_FILTERS};
pub use viterbi::Viterbi29;

#[cfg(test)]
pub use viterbi::encode_v29;
