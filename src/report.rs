//! Periodic reporting: drains the aggregator and channel statistics into
//! the published text lines.
//!
//! Line formats, one record per line:
//!
//! ```text
//! S <now_ms> <noise_floor_dB> <|dc|> <rx> <ok>
//! P <ts_ms> <prefix> <id> <rssi> <hits> <duration_ms>
//! T <ts_ms> <prefix> <id> <transponder_local_ts>
//! F <frame>                      (monitor mode only)
//! ```

use std::sync::Arc;

use crossbeam_channel::Receiver;

use crate::passing::{Passing, PassingAggregator, TimeSync};
use crate::stats::ChannelStats;
use crate::timebase::Timebase;
use crate::transponder::transponder_props;

/// Reporter cadence.
pub const POLL_INTERVAL_MS: u64 = 100;

/// A transponder is considered gone this long after its last detection.
pub const PASSING_DEADLINE_MS: u64 = 250;

/// Detection-window widening for time-sync correlation.
pub const TIMESYNC_MARGIN_MS: u64 = 500;

pub struct Reporter {
    aggregator: Arc<PassingAggregator>,
    stats: Arc<ChannelStats>,
    timebase: Arc<Timebase>,
    /// Monitor-mode frame lines from the producer thread.
    monitor: Option<Receiver<String>>,
}

impl Reporter {
    pub fn new(
        aggregator: Arc<PassingAggregator>,
        stats: Arc<ChannelStats>,
        timebase: Arc<Timebase>,
        monitor: Option<Receiver<String>>,
    ) -> Self {
        Self {
            aggregator,
            stats,
            timebase,
            monitor,
        }
    }

    /// One reporting tick: status line when due, then any time-syncs and
    /// passings that are ready.
    pub fn tick(&self) -> Vec<String> {
        let now = self.timebase.now();
        let mut lines = Vec::new();

        if let Some(monitor) = &self.monitor {
            while let Ok(line) = monitor.try_recv() {
                lines.push(line);
            }
        }

        if self.stats.reporting_due(now) {
            lines.push(format!("S {} {}", now, self.stats.to_report()));
            self.stats.reset(now);
        }

        for sync in self.aggregator.identify_timesyncs(TIMESYNC_MARGIN_MS) {
            lines.push(format_timesync(&sync));
        }

        for passing in self
            .aggregator
            .identify_passings(now.saturating_sub(PASSING_DEADLINE_MS))
        {
            lines.push(format_passing(&passing));
        }

        lines
    }
}

pub fn format_passing(p: &Passing) -> String {
    format!(
        "P {} {} {} {:.2} {} {}",
        p.timestamp,
        transponder_props(p.kind).prefix,
        p.transponder_id,
        p.rssi,
        p.hits,
        p.duration
    )
}

pub fn format_timesync(t: &TimeSync) -> String {
    format!(
        "T {} {} {} {}",
        t.timestamp,
        transponder_props(t.kind).prefix,
        t.transponder_id,
        t.transponder_timestamp
    )
}
