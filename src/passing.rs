//! Passing aggregation.
//!
//! A transponder crossing the detection loop produces a burst of decodes over
//! a few hundred milliseconds. The aggregator collects them per transponder
//! and, once a transponder has gone quiet, condenses the sequence into a
//! single passing: for thin sequences an RSSI-weighted centroid, for dense
//! ones a peak/valley analysis of the interpolated RSSI waveform, which also
//! recognises the characteristic double-hump of a transponder passing beside
//! the loop and reports a crossing duration for it.
//!
//! Time-sync status messages are held separately and bound to a transponder
//! only when exactly one detection sequence is active around the message.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use crate::frame::Frame;
use crate::transponder::TransponderKind;

/// Bound on detections kept per transponder; a stationary transponder next
/// to the loop would otherwise grow without limit.
const DETECTION_CAP: usize = 4096;

/// Passings with fewer hits than this are discarded as noise.
const REPORT_HIT_LIMIT: usize = 2;

/// Sequences at least this long get the waveform analysis.
const WAVEFORM_MIN_HITS: usize = 16;

/// Centroid participation window below the peak.
const CENTROID_WINDOW_DB: f32 = 6.0;

const GRID_POINTS: usize = 129;
const PEAK_PROMINENCE_DB: f64 = 1.0;
const VALLEY_PROMINENCE_DB: f64 = 3.0;

/// Two peaks within this spread count as one straddled crossing.
const PEAK_DELTA_DB: f64 = 3.0;

pub type TransponderKey = (TransponderKind, u32);

#[derive(Debug, Clone, Copy)]
pub struct Detection {
    pub timestamp: u64,
    pub rssi: f32,
    pub evm: f32,
}

#[derive(Debug, Clone)]
pub struct Passing {
    pub timestamp: u64,
    pub kind: TransponderKind,
    pub transponder_id: u32,
    /// Peak RSSI over the sequence, dB full scale.
    pub rssi: f32,
    pub hits: usize,
    /// Crossing duration in ms; zero unless the waveform shows a straddle.
    pub duration: u64,
}

#[derive(Debug, Clone)]
pub struct TimeSync {
    pub timestamp: u64,
    pub kind: TransponderKind,
    pub transponder_id: u32,
    /// The transponder's 20-bit local clock.
    pub transponder_timestamp: u32,
}

struct TimeSyncMsg {
    timestamp: u64,
    transponder_timestamp: u32,
}

#[derive(Default)]
struct AggregatorState {
    detections: HashMap<TransponderKey, VecDeque<Detection>>,
    timesync_messages: Vec<TimeSyncMsg>,
}

/// Shared between the SDR producer thread and the reporter; one lock covers
/// both detections and pending time-sync messages.
pub struct PassingAggregator {
    state: Mutex<AggregatorState>,
}

impl PassingAggregator {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(AggregatorState::default()),
        }
    }

    /// Record one successful decode of `transponder_id`.
    pub fn append(&self, frame: &Frame, transponder_id: u32) {
        let detection = Detection {
            timestamp: frame.timestamp,
            rssi: frame.rssi(),
            evm: frame.evm(),
        };
        let mut state = self.state.lock().unwrap();
        let seq = state
            .detections
            .entry((frame.kind, transponder_id))
            .or_default();
        seq.push_back(detection);
        if seq.len() > DETECTION_CAP {
            seq.pop_front();
        }
    }

    /// Record a time-sync status message for later correlation.
    pub fn timesync(&self, frame: &Frame, transponder_timestamp: u32) {
        let mut state = self.state.lock().unwrap();
        state.timesync_messages.push(TimeSyncMsg {
            timestamp: frame.timestamp,
            transponder_timestamp,
        });
    }

    /// Close out every transponder whose newest detection is at or before
    /// `deadline` and return the resulting passings (at least two hits each).
    pub fn identify_passings(&self, deadline: u64) -> Vec<Passing> {
        let mut state = self.state.lock().unwrap();

        let closed: Vec<TransponderKey> = state
            .detections
            .iter()
            .filter(|(_, seq)| {
                seq.back()
                    .map(|last| last.timestamp <= deadline)
                    .unwrap_or(true)
            })
            .map(|(&key, _)| key)
            .collect();

        let mut passings = Vec::new();
        for key in closed {
            let seq = state.detections.remove(&key).unwrap();
            if seq.is_empty() || seq.len() < REPORT_HIT_LIMIT {
                continue;
            }
            let (timestamp, duration) = compute_passing_point(&seq);
            let peak_rssi = seq.iter().map(|d| d.rssi).fold(f32::MIN, f32::max);
            passings.push(Passing {
                timestamp,
                kind: key.0,
                transponder_id: key.1,
                rssi: peak_rssi,
                hits: seq.len(),
                duration,
            });
        }
        passings
    }

    /// Drain all pending time-sync messages. A message is emitted only when,
    /// widened by `margin` ms on both sides, exactly one transponder's
    /// detection window covers it; everything else is dropped.
    pub fn identify_timesyncs(&self, margin: u64) -> Vec<TimeSync> {
        let mut state = self.state.lock().unwrap();
        let messages = std::mem::take(&mut state.timesync_messages);

        let mut syncs = Vec::new();
        for msg in messages {
            let mut covering = None;
            let mut count = 0;
            for (&key, seq) in state.detections.iter() {
                let (Some(front), Some(back)) = (seq.front(), seq.back()) else {
                    continue;
                };
                let w = msg.timestamp as i64;
                if (front.timestamp as i64 - margin as i64) < w
                    && w < (back.timestamp as i64 + margin as i64)
                {
                    covering = Some(key);
                    count += 1;
                }
            }
            if count == 1 {
                let key = covering.unwrap();
                syncs.push(TimeSync {
                    timestamp: msg.timestamp,
                    kind: key.0,
                    transponder_id: key.1,
                    transponder_timestamp: msg.transponder_timestamp,
                });
            }
        }
        syncs
    }
}

/// Reduce a closed detection sequence to (timestamp, duration).
fn compute_passing_point(seq: &VecDeque<Detection>) -> (u64, u64) {
    if seq.len() < WAVEFORM_MIN_HITS {
        return (weighted_centroid(seq), 0);
    }
    waveform_passing(seq)
}

/// RSSI-magnitude weighted mean timestamp over the detections within
/// `CENTROID_WINDOW_DB` of the peak.
fn weighted_centroid(seq: &VecDeque<Detection>) -> u64 {
    let peak = seq.iter().map(|d| d.rssi).fold(f32::MIN, f32::max);
    let floor = peak - CENTROID_WINDOW_DB;

    let mut sum_tw = 0.0f64;
    let mut sum_w = 0.0f64;
    for d in seq {
        if d.rssi >= floor {
            let w = d.rssi.abs() as f64;
            sum_tw += d.timestamp as f64 * w;
            sum_w += w;
        }
    }
    if sum_w == 0.0 {
        return seq.back().map(|d| d.timestamp).unwrap_or(0);
    }
    (sum_tw / sum_w) as u64
}

#[derive(Debug, Clone, Copy)]
struct Extremum {
    index: usize,
    value: f64,
}

/// Peak/valley analysis of the RSSI waveform.
fn waveform_passing(seq: &VecDeque<Detection>) -> (u64, u64) {
    let t0 = seq.front().unwrap().timestamp;
    let t1 = seq.back().unwrap().timestamp;
    if t1 <= t0 {
        return (weighted_centroid(seq), 0);
    }
    let span = (t1 - t0) as f64;

    // timestamps normalised to [0, 1], RSSI linearly interpolated onto a
    // uniform grid
    let mut grid = [0.0f64; GRID_POINTS];
    let dets: Vec<(f64, f64)> = seq
        .iter()
        .map(|d| (((d.timestamp - t0) as f64) / span, d.rssi as f64))
        .collect();
    let mut seg = 0;
    for (g, slot) in grid.iter_mut().enumerate() {
        let u = g as f64 / (GRID_POINTS - 1) as f64;
        while seg + 2 < dets.len() && dets[seg + 1].0 <= u {
            seg += 1;
        }
        let (u0, v0) = dets[seg];
        let (u1, v1) = dets[seg + 1];
        *slot = if u1 > u0 {
            let frac = ((u - u0) / (u1 - u0)).clamp(0.0, 1.0);
            v0 + frac * (v1 - v0)
        } else {
            v0
        };
    }

    let peaks = find_extrema(&grid, PEAK_PROMINENCE_DB, false);
    let valleys = find_extrema(&grid, VALLEY_PROMINENCE_DB, true);

    let at = |e: &Extremum| t0 as f64 + e.index as f64 / (GRID_POINTS - 1) as f64 * span;
    let valley_span = || {
        let first = at(valleys.first().unwrap());
        let last = at(valleys.last().unwrap());
        (last - first).round() as u64
    };

    match (peaks.len(), valleys.len()) {
        (1, _) => (at(&peaks[0]).round() as u64, 0),
        (3, 2 | 3) => (at(&peaks[1]).round() as u64, valley_span()),
        (2, 2 | 3) => {
            let mid = (at(&peaks[0]) + at(&peaks[1])) / 2.0;
            (mid.round() as u64, valley_span())
        }
        (2, _) => {
            let mid = (at(&peaks[0]) + at(&peaks[1])) / 2.0;
            let duration = if (peaks[0].value - peaks[1].value).abs() < PEAK_DELTA_DB {
                (at(&peaks[1]) - at(&peaks[0])).round() as u64
            } else {
                0
            };
            (mid.round() as u64, duration)
        }
        _ => (weighted_centroid(seq), 0),
    }
}

/// Local maxima of `values` (or minima, when `invert`) with at least
/// `min_prominence` of height over the higher of the two surrounding
/// valleys. Signal endpoints are eligible.
fn find_extrema(values: &[f64], min_prominence: f64, invert: bool) -> Vec<Extremum> {
    let n = values.len();
    let v = |i: usize| if invert { -values[i] } else { values[i] };

    let mut extrema = Vec::new();
    for i in 0..n {
        let is_candidate = match i {
            0 => v(0) > v(1),
            _ if i == n - 1 => v(n - 1) > v(n - 2),
            _ => v(i) > v(i - 1) && v(i) >= v(i + 1),
        };
        if !is_candidate {
            continue;
        }

        // walk outward until higher terrain, tracking the lowest saddle
        let mut left_base = None;
        let mut low = f64::MAX;
        for j in (0..i).rev() {
            low = low.min(v(j));
            if v(j) > v(i) {
                break;
            }
            left_base = Some(low);
        }
        if i > 0 {
            left_base = Some(left_base.unwrap_or(low));
        }

        let mut right_base = None;
        let mut low = f64::MAX;
        for j in i + 1..n {
            low = low.min(v(j));
            if v(j) > v(i) {
                break;
            }
            right_base = Some(low);
        }
        if i < n - 1 {
            right_base = Some(right_base.unwrap_or(low));
        }

        let base = match (left_base, right_base) {
            (Some(l), Some(r)) => l.max(r),
            (Some(l), None) => l,
            (None, Some(r)) => r,
            (None, None) => continue,
        };
        if v(i) - base >= min_prominence {
            extrema.push(Extremum {
                index: i,
                value: values[i],
            });
        }
    }
    extrema
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_at(kind: TransponderKind, ts: u64, rssi_db: f32) -> Frame {
        let mut frame = Frame::new(kind, ts);
        // symbol_rms chosen so frame.rssi() equals rssi_db
        frame.symbol_rms = 127.0 * 10f32.powf(rssi_db / 20.0);
        frame
    }

    fn append_at(agg: &PassingAggregator, kind: TransponderKind, id: u32, ts: u64, rssi: f32) {
        let frame = frame_at(kind, ts, rssi);
        agg.append(&frame, id);
    }

    #[test]
    fn test_single_passing_s1() {
        let agg = PassingAggregator::new();
        for (ts, rssi) in [(1000, -40.0), (1005, -30.0), (1010, -38.0)] {
            append_at(&agg, TransponderKind::OpenStint, 1_234_567, ts, rssi);
        }
        let passings = agg.identify_passings(2000);
        assert_eq!(passings.len(), 1);
        let p = &passings[0];
        assert_eq!(p.timestamp, 1005);
        assert_eq!(p.hits, 3);
        assert_eq!(p.transponder_id, 1_234_567);
        assert_eq!(p.kind, TransponderKind::OpenStint);
        assert!((p.rssi - -30.0).abs() < 0.01);
        assert_eq!(p.duration, 0);
    }

    #[test]
    fn test_weighted_centroid_s2() {
        let agg = PassingAggregator::new();
        for (ts, rssi) in [
            (100, -50.0),
            (110, -40.0),
            (120, -45.0),
            (130, -38.0),
            (140, -52.0),
        ] {
            append_at(&agg, TransponderKind::Legacy, 42, ts, rssi);
        }
        let passings = agg.identify_passings(1000);
        assert_eq!(passings.len(), 1);
        // only -40 and -38 are within 6 dB of the peak:
        // (110*40 + 130*38) / (40+38) = 119.74 -> 119
        assert_eq!(passings[0].timestamp, 119);
        assert_eq!(passings[0].hits, 5);
    }

    #[test]
    fn test_double_peak_waveform_s3() {
        let agg = PassingAggregator::new();
        // two equal humps peaking at indices 8 and 24, valleys at 0, 16, 31
        for i in 0..32u64 {
            let rssi = match i {
                0..=8 => -60.0 + 2.5 * i as f32,
                9..=16 => -40.0 - 2.5 * (i - 8) as f32,
                17..=24 => -60.0 + 2.5 * (i - 16) as f32,
                _ => -40.0 - 2.5 * (i - 24) as f32,
            };
            append_at(&agg, TransponderKind::OpenStint, 77, 1000 + 20 * i, rssi);
        }
        let passings = agg.identify_passings(5000);
        assert_eq!(passings.len(), 1);
        let p = &passings[0];
        // midpoint of the two peaks (ts 1160 and 1480)
        assert_eq!(p.timestamp, 1320);
        // first to last valley
        assert_eq!(p.duration, 620);
        assert_eq!(p.hits, 32);
    }

    #[test]
    fn test_centroid_to_waveform_switch_at_16() {
        // asymmetric single hump peaking at index 12
        let build = |n: u64| {
            let agg = PassingAggregator::new();
            for i in 0..n {
                let rssi = -30.0 - 1.5 * (12i64 - i as i64).abs() as f32;
                append_at(&agg, TransponderKind::Legacy, 9, 100 * i, rssi);
            }
            agg.identify_passings(10_000).remove(0)
        };

        // 15 hits: weighted centroid over detections within 6 dB
        let p15 = build(15);
        assert_eq!(p15.timestamp, 1092);

        // 16 hits: waveform analysis finds the single peak instead
        let p16 = build(16);
        assert_eq!(p16.timestamp, 1195);
        assert_eq!(p16.duration, 0);
        assert_ne!(p15.timestamp, p16.timestamp);
    }

    #[test]
    fn test_hit_limit_and_removal() {
        let agg = PassingAggregator::new();
        append_at(&agg, TransponderKind::OpenStint, 1, 100, -40.0);
        // a single hit never reports, but the key is still closed out
        let passings = agg.identify_passings(1000);
        assert!(passings.is_empty());
        append_at(&agg, TransponderKind::OpenStint, 1, 2000, -40.0);
        append_at(&agg, TransponderKind::OpenStint, 1, 2001, -40.0);
        let passings = agg.identify_passings(3000);
        assert_eq!(passings.len(), 1);
        assert_eq!(passings[0].hits, 2);
    }

    #[test]
    fn test_duplicate_detection_reports_two_hits() {
        let agg = PassingAggregator::new();
        append_at(&agg, TransponderKind::Legacy, 5, 500, -35.0);
        append_at(&agg, TransponderKind::Legacy, 5, 500, -35.0);
        let passings = agg.identify_passings(600);
        assert_eq!(passings.len(), 1);
        assert_eq!(passings[0].hits, 2);
        assert_eq!(passings[0].timestamp, 500);
    }

    #[test]
    fn test_deadline_respected() {
        let agg = PassingAggregator::new();
        append_at(&agg, TransponderKind::OpenStint, 1, 100, -40.0);
        append_at(&agg, TransponderKind::OpenStint, 1, 200, -40.0);
        append_at(&agg, TransponderKind::OpenStint, 2, 100, -40.0);
        append_at(&agg, TransponderKind::OpenStint, 2, 900, -40.0);
        // only id 1 is quiet by deadline 500
        let passings = agg.identify_passings(500);
        assert_eq!(passings.len(), 1);
        assert_eq!(passings[0].transponder_id, 1);
        // id 2 still drains later
        let passings = agg.identify_passings(1000);
        assert_eq!(passings.len(), 1);
        assert_eq!(passings[0].transponder_id, 2);
    }

    #[test]
    fn test_detection_cap() {
        let agg = PassingAggregator::new();
        for i in 0..(DETECTION_CAP as u64 + 100) {
            append_at(&agg, TransponderKind::OpenStint, 3, i, -40.0);
        }
        let state = agg.state.lock().unwrap();
        let seq = &state.detections[&(TransponderKind::OpenStint, 3)];
        assert_eq!(seq.len(), DETECTION_CAP);
        assert!(seq.iter().all(|d| d.evm >= 0.0));
        // oldest dropped, order kept
        assert_eq!(seq.front().unwrap().timestamp, 100);
        assert!(seq
            .iter()
            .zip(seq.iter().skip(1))
            .all(|(a, b)| a.timestamp <= b.timestamp));
    }

    #[test]
    fn test_timesync_unique_match_s4() {
        let agg = PassingAggregator::new();
        append_at(&agg, TransponderKind::OpenStint, 1_234_567, 2000, -40.0);
        append_at(&agg, TransponderKind::OpenStint, 1_234_567, 3000, -40.0);
        let frame = frame_at(TransponderKind::OpenStint, 2500, -40.0);
        agg.timesync(&frame, 0xABCDE);

        let syncs = agg.identify_timesyncs(500);
        assert_eq!(syncs.len(), 1);
        assert_eq!(syncs[0].transponder_id, 1_234_567);
        assert_eq!(syncs[0].transponder_timestamp, 0xABCDE);
        assert_eq!(syncs[0].timestamp, 2500);

        // messages are drained either way
        assert!(agg.identify_timesyncs(500).is_empty());
    }

    #[test]
    fn test_timesync_ambiguous_s5() {
        let agg = PassingAggregator::new();
        for id in [1, 2] {
            append_at(&agg, TransponderKind::OpenStint, id, 2000, -40.0);
            append_at(&agg, TransponderKind::OpenStint, id, 3000, -40.0);
        }
        let frame = frame_at(TransponderKind::OpenStint, 2500, -40.0);
        agg.timesync(&frame, 0x12345);
        assert!(agg.identify_timesyncs(500).is_empty());
        // drained despite the ambiguity
        assert!(agg.identify_timesyncs(500).is_empty());
    }

    #[test]
    fn test_timesync_window_boundary_is_strict() {
        let agg = PassingAggregator::new();
        append_at(&agg, TransponderKind::OpenStint, 10, 2000, -40.0);
        append_at(&agg, TransponderKind::OpenStint, 10, 3000, -40.0);

        // exactly at front - margin: excluded
        let frame = frame_at(TransponderKind::OpenStint, 1500, -40.0);
        agg.timesync(&frame, 1);
        assert!(agg.identify_timesyncs(500).is_empty());

        // one ms inside: included
        let frame = frame_at(TransponderKind::OpenStint, 1501, -40.0);
        agg.timesync(&frame, 2);
        let syncs = agg.identify_timesyncs(500);
        assert_eq!(syncs.len(), 1);
        assert_eq!(syncs[0].transponder_timestamp, 2);
    }
}
