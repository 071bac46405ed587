//! Diagnostic events emitted by the demultiplexing pin.
//!
//! Events are informational. Nothing about the data flow changes after an
//! event is emitted; they exist for logging and flow statistics.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crate::processor::{PidStatistics, ProcessorCounters};

/// Diagnostic records produced by the demultiplexing pin.
///
/// The `Display` form of each variant is a single compact log line.
///
/// # Example
///
/// ```
/// use ts_demux_pin::{DemuxEvent, PidStatistics};
///
/// let event = DemuxEvent::PidSummary {
///     pid: 100,
///     statistics: PidStatistics { min_size: 10, max_size: 30, count: 3, total_bytes: 60 },
/// };
/// assert_eq!(event.to_string(), "[00100] #3 60 ([10..30] 20)");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DemuxEvent {
    /// Flow summary for one PID, emitted when its consumer is deactivated or
    /// the pin stops.
    PidSummary {
        /// The packet identifier.
        pid: u16,
        /// Unit statistics gathered while the consumer was active.
        statistics: PidStatistics,
    },

    /// Aggregate processor counters, emitted when the pin stops.
    AggregateSummary {
        /// Counters reported by the packet processor.
        counters: ProcessorCounters,
        /// Samples that reached the passthrough output.
        forwarded: u64,
    },

    /// Raw packet count for one PID, emitted when the pin stops.
    PacketCount {
        /// The packet identifier.
        pid: u16,
        /// Number of packets seen on this PID.
        packets: u64,
    },

    /// Writing the raw capture failed; the capture has been disabled.
    CaptureFailed {
        /// Path of the capture file.
        path: PathBuf,
        /// Description of the error.
        error: String,
    },
}

impl fmt::Display for DemuxEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PidSummary { pid, statistics } => write!(
                f,
                "[{pid:05}] #{} {} ([{}..{}] {})",
                statistics.count,
                statistics.total_bytes,
                statistics.min_size,
                statistics.max_size,
                statistics.bytes_per_unit()
            ),
            Self::AggregateSummary {
                counters,
                forwarded,
            } => write!(
                f,
                "cb={} b={} s={} p={} enc={} strm={} tbl={} sync={} err={} out={forwarded}",
                counters.callbacks,
                counters.bytes_received,
                counters.bytes_skipped,
                counters.packets_received,
                counters.scrambled,
                counters.corrupted_stream,
                counters.corrupted_table,
                counters.resynchronized,
                counters.transmission_errors,
            ),
            Self::PacketCount { pid, packets } => write!(f, "{pid:05} #{packets}"),
            Self::CaptureFailed { path, error } => {
                write!(f, "capture {} disabled: {error}", path.display())
            }
        }
    }
}

/// Receiver for diagnostic events.
///
/// When no sink is installed, diagnostics are disabled.
pub type DiagnosticSink = Arc<dyn Fn(&DemuxEvent) + Send + Sync>;

/// Creates a [`DiagnosticSink`] from a closure.
///
/// # Example
///
/// ```
/// use ts_demux_pin::{diagnostic_sink, DemuxEvent};
///
/// let sink = diagnostic_sink(|event| println!("{event}"));
/// sink(&DemuxEvent::PacketCount { pid: 0, packets: 12 });
/// ```
pub fn diagnostic_sink<F>(f: F) -> DiagnosticSink
where
    F: Fn(&DemuxEvent) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// A [`DiagnosticSink`] that writes every event through `tracing`.
pub fn tracing_diagnostics() -> DiagnosticSink {
    diagnostic_sink(|event| match event {
        DemuxEvent::CaptureFailed { .. } => tracing::warn!(target: "ts_demux_pin::stats", "{event}"),
        _ => tracing::info!(target: "ts_demux_pin::stats", "{event}"),
    })
}
