//! Per-stream receiver state, driven buffer by buffer from the SDR callback
//! thread.
//!
//! The context is the only owner of the detector, symbol reader and payload
//! decoders; the aggregator and channel statistics are shared with the
//! reporter behind their own locks. Nothing here blocks except those locks.

use std::sync::Arc;

use crossbeam_channel::Sender;
use num_complex::Complex;

use crate::config::{SAMPLES_PER_SYMBOL, SAMPLE_RATE};
use crate::detect::FrameDetector;
use crate::frame::Frame;
use crate::passing::PassingAggregator;
use crate::reader::SymbolReader;
use crate::stats::ChannelStats;
use crate::timebase::Timebase;
use crate::transponder::{
    TransponderDecoder, TransponderKind, MAX_TRANSPONDER_ID, TIMESYNC_STATUS_MASK,
    TIMESYNC_TIME_MASK,
};

enum ParseMode {
    Seek,
    Read,
}

pub struct ReceiverContext {
    detector: FrameDetector,
    reader: SymbolReader,
    decoder: TransponderDecoder,
    aggregator: Arc<PassingAggregator>,
    stats: Arc<ChannelStats>,
    timebase: Arc<Timebase>,
    /// Formatted frame lines for monitor mode, delivered to the reporter.
    monitor: Option<Sender<String>>,

    mode: ParseMode,
    frame: Option<Frame>,
}

impl ReceiverContext {
    pub fn new(
        detection_threshold: f32,
        aggregator: Arc<PassingAggregator>,
        stats: Arc<ChannelStats>,
        timebase: Arc<Timebase>,
        monitor: Option<Sender<String>>,
    ) -> Self {
        Self {
            detector: FrameDetector::new(detection_threshold),
            reader: SymbolReader::new(),
            decoder: TransponderDecoder::new(),
            aggregator,
            stats,
            timebase,
            monitor,
            mode: ParseMode::Seek,
            frame: None,
        }
    }

    /// Run the full DSP pipeline over one SDR buffer.
    pub fn process_buffer(&mut self, samples: &[Complex<i8>]) {
        let buffer_timestamp = self.timebase.now();
        let mut frame_in_buffer = false;

        let mut idx = 0;
        while idx + SAMPLES_PER_SYMBOL <= samples.len() {
            match self.mode {
                ParseMode::Seek => {
                    if let Some(kind) = self.detector.process_baseband(&samples[idx..]) {
                        self.mode = ParseMode::Read;
                        frame_in_buffer = true;
                        let timestamp =
                            buffer_timestamp + (1000 * idx as u64) / SAMPLE_RATE as u64;
                        let mut frame = Frame::new(kind, timestamp);
                        self.reader.read_preamble(
                            &mut frame,
                            self.detector.dc_offset(),
                            samples,
                            idx + SAMPLES_PER_SYMBOL,
                        );
                        self.frame = Some(frame);
                    }
                }
                ParseMode::Read => {
                    let mut frame = self.frame.take().expect("frame present in read mode");
                    self.reader
                        .read_symbol(&mut frame, self.detector.dc_offset(), &samples[idx..]);
                    if self.reader.is_frame_complete(&frame) {
                        self.mode = ParseMode::Seek;
                        let processed = self.process_frame(frame);
                        self.stats.register_frame(processed);
                    } else {
                        self.frame = Some(frame);
                    }
                }
            }
            idx += SAMPLES_PER_SYMBOL;
        }

        // keep the buffer tail for preambles that straddle the boundary
        self.reader.update_reserve_buffer(samples);

        if frame_in_buffer {
            // burst energy would poison the noise and DC estimates
            self.detector.reset_statistics_counters();
        } else {
            self.detector.update_statistics();
            self.stats
                .save_channel_characteristics(self.detector.dc_offset(), self.detector.noise_energy());
        }
    }

    /// Resolve and decode one completed frame. True means the payload
    /// decoded cleanly, whether it was an id or a status message.
    fn process_frame(&mut self, mut frame: Frame) -> bool {
        let Some(payload) = frame.resolve_payload() else {
            return false;
        };

        if let Some(monitor) = &self.monitor {
            let _ = monitor.try_send(format!("F {frame}"));
        }

        match frame.kind {
            TransponderKind::OpenStint => {
                match self.decoder.decode_openstint(&frame.softbits[payload..]) {
                    Some(id) if id < MAX_TRANSPONDER_ID => {
                        self.aggregator.append(&frame, id);
                        true
                    }
                    Some(id) if id & TIMESYNC_STATUS_MASK == TIMESYNC_STATUS_MASK => {
                        self.aggregator.timesync(&frame, id & TIMESYNC_TIME_MASK);
                        true
                    }
                    // decodable but unknown status traffic
                    Some(_) => true,
                    None => false,
                }
            }
            TransponderKind::Legacy => {
                match self.decoder.decode_legacy(&frame.softbits[payload..]) {
                    Some(id) if id < MAX_TRANSPONDER_ID => {
                        self.aggregator.append(&frame, id);
                        true
                    }
                    Some(_) => true,
                    None => false,
                }
            }
        }
    }
}
