//! Packet processor abstraction and implementations.
//!
//! A [`PacketProcessor`] receives raw transport stream bytes, splits them into
//! packets and dispatches reassembled units to per-PID callbacks. The crate
//! provides two processors:
//!
//! - [`TsPacketProcessor`]: full transport stream processing (sync search,
//!   error/scrambling detection, PES and section reassembly)
//! - [`MockProcessor`]: treats each submitted buffer as one unit, for testing
//!   the pin without building transport stream packets
//!
//! You can implement the trait yourself to plug in a different parser.

mod assembler;
mod mock;
mod ts;

pub use mock::MockProcessor;
pub use ts::TsPacketProcessor;

use std::sync::Arc;

/// Size of one transport stream packet in bytes.
pub const TS_PACKET_SIZE: usize = 188;

/// Sync byte at the start of every transport stream packet.
pub const TS_SYNC_BYTE: u8 = 0x47;

/// Callback receiving one reassembled unit (PES packet or PSI section).
///
/// Callbacks run synchronously on the delivering thread while the processor
/// is locked, so a slow callback throttles the whole pipeline. A callback may
/// reconfigure the pin that invokes it; the change applies once the current
/// buffer has been processed.
pub type UnitCallback = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// Creates a [`UnitCallback`] from a closure.
pub fn unit_callback<F>(f: F) -> UnitCallback
where
    F: Fn(&[u8]) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Unit statistics for one PID.
///
/// All values only grow while the PID's filter is installed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PidStatistics {
    /// Smallest unit seen, 0 if none.
    pub min_size: usize,
    /// Largest unit seen, 0 if none.
    pub max_size: usize,
    /// Number of units dispatched.
    pub count: u64,
    /// Total bytes dispatched.
    pub total_bytes: u64,
}

impl PidStatistics {
    /// Accounts for one dispatched unit.
    pub fn record(&mut self, size: usize) {
        if self.count == 0 {
            self.min_size = size;
            self.max_size = size;
        } else {
            self.min_size = self.min_size.min(size);
            self.max_size = self.max_size.max(size);
        }
        self.count += 1;
        self.total_bytes += size as u64;
    }

    /// Average unit size in bytes, 0 if nothing was dispatched.
    pub fn bytes_per_unit(&self) -> u64 {
        if self.count == 0 {
            0
        } else {
            self.total_bytes / self.count
        }
    }
}

/// Aggregate counters of a packet processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProcessorCounters {
    /// Number of `submit` calls.
    pub callbacks: u64,
    /// Bytes handed to `submit`.
    pub bytes_received: u64,
    /// Bytes discarded while searching for packet sync.
    pub bytes_skipped: u64,
    /// Complete packets seen.
    pub packets_received: u64,
    /// Packets skipped because their payload was scrambled.
    pub scrambled: u64,
    /// PES units dropped after a continuity error.
    pub corrupted_stream: u64,
    /// Sections dropped as malformed or discontinuous.
    pub corrupted_table: u64,
    /// Number of times packet sync was lost.
    pub resynchronized: u64,
    /// Packets flagged with the transport error indicator.
    pub transmission_errors: u64,
}

/// Splits raw transport stream data and dispatches units per PID.
///
/// The demultiplexing pin owns its processor exclusively and serializes all
/// calls, so implementations need no internal locking.
pub trait PacketProcessor: Send {
    /// Accepts one buffer of raw packets.
    fn submit(&mut self, data: &[u8]);

    /// Starts dispatching units of `pid` to `callback`, replacing any
    /// previous filter for that PID.
    fn set_filter(&mut self, pid: u16, is_control_data: bool, callback: UnitCallback);

    /// Stops dispatching units of `pid` and forgets its statistics.
    fn remove_filter(&mut self, pid: u16);

    /// Returns `true` if a filter for `pid` is installed.
    fn has_filter(&self, pid: u16) -> bool;

    /// Unit statistics for `pid`; all zero when no filter is installed.
    fn statistics(&self, pid: u16) -> PidStatistics;

    /// Aggregate counters.
    fn counters(&self) -> ProcessorCounters;

    /// Per-PID packet counts, sorted by PID. Empty unless statistics are enabled.
    fn packet_statistics(&self) -> Vec<(u16, u64)>;

    /// Enables or disables per-PID packet counting. Always clears the counts.
    fn set_fill_statistics(&mut self, enabled: bool);

    /// Returns `true` if per-PID packet counting is enabled.
    fn fill_statistics(&self) -> bool;

    /// Resets aggregate counters, packet counts and unit statistics.
    fn clear_statistics(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statistics_record() {
        let mut stats = PidStatistics::default();
        for size in [20, 10, 30] {
            stats.record(size);
        }
        assert_eq!(
            stats,
            PidStatistics {
                min_size: 10,
                max_size: 30,
                count: 3,
                total_bytes: 60,
            }
        );
        assert_eq!(stats.bytes_per_unit(), 20);
    }

    #[test]
    fn test_statistics_empty() {
        let stats = PidStatistics::default();
        assert_eq!(stats.min_size, 0);
        assert_eq!(stats.bytes_per_unit(), 0);
    }

    #[test]
    fn test_processor_is_object_safe() {
        fn assert_send<T: Send + ?Sized>() {}
        assert_send::<Box<dyn PacketProcessor>>();
    }
}
