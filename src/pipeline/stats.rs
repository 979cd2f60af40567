//! Pipeline counters.
//!
//! Plain relaxed atomics: every counter is written by exactly one task and only
//! read for reporting, so no ordering between counters is promised.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic counters shared by the pipeline tasks.
#[derive(Debug, Default)]
pub struct PipelineStats {
    samples_written: AtomicU64,
    acquisition_failures: AtomicU64,
    detector_cycles: AtomicU64,
    warmup_cycles: AtomicU64,
    degenerate_cycles: AtomicU64,
    events_detected: AtomicU64,
    triggers: AtomicU64,
    packets_sent: AtomicU64,
    packets_dropped: AtomicU64,
    send_failures: AtomicU64,
}

/// Point-in-time copy of [`PipelineStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Samples written to the store.
    pub samples_written: u64,
    /// ADC reads that failed and skipped their tick.
    pub acquisition_failures: u64,
    /// Detector wakeups.
    pub detector_cycles: u64,
    /// Wakeups skipped because the long window was not filled yet.
    pub warmup_cycles: u64,
    /// Wakeups skipped because the long-term average was zero.
    pub degenerate_cycles: u64,
    /// Idle → Triggered edges.
    pub events_detected: u64,
    /// Transmit requests, detector edges and manual ones.
    pub triggers: u64,
    /// Packets accepted by the transport.
    pub packets_sent: u64,
    /// Packets dropped for backpressure, clock failure or an empty store.
    pub packets_dropped: u64,
    /// Packets refused with a hard transport failure.
    pub send_failures: u64,
}

macro_rules! counter {
    ($($record:ident => $field:ident),* $(,)?) => {
        impl PipelineStats {
            $(
                pub(crate) fn $record(&self) {
                    self.$field.fetch_add(1, Ordering::Relaxed);
                }
            )*

            /// Read every counter.
            #[must_use]
            pub fn snapshot(&self) -> StatsSnapshot {
                StatsSnapshot {
                    $($field: self.$field.load(Ordering::Relaxed),)*
                }
            }
        }
    };
}

counter! {
    record_sample => samples_written,
    record_acquisition_failure => acquisition_failures,
    record_detector_cycle => detector_cycles,
    record_warmup => warmup_cycles,
    record_degenerate => degenerate_cycles,
    record_event => events_detected,
    record_trigger => triggers,
    record_sent => packets_sent,
    record_dropped => packets_dropped,
    record_send_failure => send_failures,
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "samples written:      {}", self.samples_written)?;
        writeln!(f, "acquisition failures: {}", self.acquisition_failures)?;
        writeln!(
            f,
            "detector cycles:      {} (warm-up {}, degenerate {})",
            self.detector_cycles, self.warmup_cycles, self.degenerate_cycles
        )?;
        writeln!(f, "events detected:      {}", self.events_detected)?;
        writeln!(f, "transmit triggers:    {}", self.triggers)?;
        write!(
            f,
            "packets:              {} sent, {} dropped, {} failed",
            self.packets_sent, self.packets_dropped, self.send_failures
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_records() {
        let stats = PipelineStats::default();
        stats.record_sample();
        stats.record_sample();
        stats.record_dropped();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.samples_written, 2);
        assert_eq!(snapshot.packets_dropped, 1);
        assert_eq!(snapshot.events_detected, 0);
        assert!(snapshot.to_string().contains("0 sent, 1 dropped"));
    }
}
