//! Mock packet processor for testing without transport stream data.

use std::collections::{BTreeMap, HashMap};

use super::{PacketProcessor, PidStatistics, ProcessorCounters, UnitCallback};

/// A processor that treats every submitted buffer as one complete unit.
///
/// Each `submit` dispatches the whole buffer to every installed filter, so
/// tests can drive the demultiplexing pin with arbitrary payload sizes.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use ts_demux_pin::{MockProcessor, PacketProcessor, unit_callback};
///
/// let seen = Arc::new(AtomicUsize::new(0));
/// let seen_clone = seen.clone();
///
/// let mut mock = MockProcessor::new();
/// mock.set_filter(100, false, unit_callback(move |unit| {
///     seen_clone.fetch_add(unit.len(), Ordering::SeqCst);
/// }));
/// mock.submit(&[0u8; 10]);
///
/// assert_eq!(seen.load(Ordering::SeqCst), 10);
/// assert_eq!(mock.statistics(100).count, 1);
/// ```
#[derive(Default)]
pub struct MockProcessor {
    filters: HashMap<u16, MockFilter>,
    counters: ProcessorCounters,
    fill_statistics: bool,
    packet_statistics: BTreeMap<u16, u64>,
    submitted: Vec<Vec<u8>>,
}

struct MockFilter {
    is_control_data: bool,
    callback: UnitCallback,
    statistics: PidStatistics,
}

impl MockProcessor {
    /// Creates an empty mock processor.
    pub fn new() -> Self {
        Self::default()
    }

    /// All buffers submitted so far, in order.
    pub fn submitted(&self) -> &[Vec<u8>] {
        &self.submitted
    }

    /// Returns whether `pid` was installed as control data, if installed.
    pub fn is_control_data(&self, pid: u16) -> Option<bool> {
        self.filters.get(&pid).map(|filter| filter.is_control_data)
    }
}

impl PacketProcessor for MockProcessor {
    fn submit(&mut self, data: &[u8]) {
        self.counters.callbacks += 1;
        self.counters.bytes_received += data.len() as u64;
        self.counters.packets_received += 1;
        self.submitted.push(data.to_vec());

        for (&pid, filter) in &mut self.filters {
            if self.fill_statistics {
                *self.packet_statistics.entry(pid).or_insert(0) += 1;
            }
            filter.statistics.record(data.len());
            (filter.callback)(data);
        }
    }

    fn set_filter(&mut self, pid: u16, is_control_data: bool, callback: UnitCallback) {
        self.filters.insert(
            pid,
            MockFilter {
                is_control_data,
                callback,
                statistics: PidStatistics::default(),
            },
        );
    }

    fn remove_filter(&mut self, pid: u16) {
        self.filters.remove(&pid);
    }

    fn has_filter(&self, pid: u16) -> bool {
        self.filters.contains_key(&pid)
    }

    fn statistics(&self, pid: u16) -> PidStatistics {
        self.filters
            .get(&pid)
            .map(|filter| filter.statistics)
            .unwrap_or_default()
    }

    fn counters(&self) -> ProcessorCounters {
        self.counters
    }

    fn packet_statistics(&self) -> Vec<(u16, u64)> {
        self.packet_statistics
            .iter()
            .map(|(&pid, &packets)| (pid, packets))
            .collect()
    }

    fn set_fill_statistics(&mut self, enabled: bool) {
        self.fill_statistics = enabled;
        self.packet_statistics.clear();
    }

    fn fill_statistics(&self) -> bool {
        self.fill_statistics
    }

    fn clear_statistics(&mut self) {
        self.counters = ProcessorCounters::default();
        self.packet_statistics.clear();
        for filter in self.filters.values_mut() {
            filter.statistics = PidStatistics::default();
        }
    }
}
