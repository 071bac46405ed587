//! Transport stream packet processor.
//!
//! Incoming bytes pass through two phases:
//!
//! ```text
//! unsynchronized: collect sync_count * 188 bytes → search packet grid → lock
//! synchronized:   fill 188-byte packet → check header → dispatch payload
//! ```
//!
//! A packet without the sync byte drops back to the unsynchronized phase and
//! resets every assembler.

use std::collections::{BTreeMap, HashMap};

use super::assembler::{PacketPayload, UnitAssembler};
use super::{
    PacketProcessor, PidStatistics, ProcessorCounters, UnitCallback, TS_PACKET_SIZE, TS_SYNC_BYTE,
};
use crate::config::DEFAULT_SYNC_COUNT;

/// Payload bytes of a packet without adaptation field.
const TS_PAYLOAD_SIZE: usize = TS_PACKET_SIZE - 4;

/// Splits a transport stream into packets and reassembles units per PID.
///
/// # Example
///
/// ```
/// use ts_demux_pin::{PacketProcessor, TsPacketProcessor, unit_callback};
///
/// let mut processor = TsPacketProcessor::new();
/// processor.set_filter(0, true, unit_callback(|section| {
///     println!("PAT section of {} bytes", section.len());
/// }));
/// processor.submit(&[0x47; 188 * 5]);
/// assert_eq!(processor.counters().packets_received, 5);
/// ```
pub struct TsPacketProcessor {
    sync_count: usize,
    sync_buffer: Vec<u8>,
    sync_fill: usize,
    synchronized: bool,
    packet: [u8; TS_PACKET_SIZE],
    packet_fill: usize,
    counters: ProcessorCounters,
    fill_statistics: bool,
    packet_statistics: BTreeMap<u16, u64>,
    consumers: HashMap<u16, UnitAssembler>,
}

impl TsPacketProcessor {
    /// Creates a processor requiring the default number of sync bytes.
    pub fn new() -> Self {
        Self::with_sync_count(DEFAULT_SYNC_COUNT)
    }

    /// Creates a processor requiring `sync_count` consecutive packet starts
    /// (at least 1) before it locks onto the stream.
    pub fn with_sync_count(sync_count: usize) -> Self {
        let sync_count = sync_count.max(1);
        Self {
            sync_count,
            sync_buffer: vec![0; sync_count * TS_PACKET_SIZE],
            sync_fill: 0,
            synchronized: false,
            packet: [0; TS_PACKET_SIZE],
            packet_fill: 0,
            counters: ProcessorCounters::default(),
            fill_statistics: false,
            packet_statistics: BTreeMap::new(),
            consumers: HashMap::new(),
        }
    }

    /// Returns `true` once the processor has locked onto the packet grid.
    pub fn is_synchronized(&self) -> bool {
        self.synchronized
    }

    /// Offset of the first packet start confirmed by `sync_count` sync bytes.
    fn find_grid(&self) -> Option<usize> {
        (0..TS_PACKET_SIZE).find(|&start| {
            (0..self.sync_count)
                .all(|n| self.sync_buffer[start + n * TS_PACKET_SIZE] == TS_SYNC_BYTE)
        })
    }

    /// Collects bytes for the sync search; returns the unconsumed rest.
    fn synchronize<'a>(&mut self, data: &'a [u8]) -> &'a [u8] {
        let copy = (self.sync_buffer.len() - self.sync_fill).min(data.len());
        self.sync_buffer[self.sync_fill..self.sync_fill + copy].copy_from_slice(&data[..copy]);
        self.sync_fill += copy;

        if self.sync_fill < self.sync_buffer.len() {
            return &data[copy..];
        }

        self.sync_fill = 0;

        // only bytes in front of the grid are skipped; without a grid the
        // whole window is
        let Some(start) = self.find_grid() else {
            self.counters.bytes_skipped += self.sync_buffer.len() as u64;
            return &data[copy..];
        };

        self.counters.bytes_skipped += start as u64;

        let grid = std::mem::take(&mut self.sync_buffer);
        self.synchronized = true;
        self.packet_fill = 0;

        // every packet start in the grid carries a sync byte, so this
        // cannot lose sync again
        self.feed(&grid[start..]);
        self.sync_buffer = grid;

        tracing::debug!(offset = start, "transport stream synchronized");

        &data[copy..]
    }

    /// Splits synchronized data into packets; returns the unconsumed rest
    /// if sync was lost.
    fn feed<'a>(&mut self, mut data: &'a [u8]) -> &'a [u8] {
        while !data.is_empty() {
            let copy = (TS_PACKET_SIZE - self.packet_fill).min(data.len());
            self.packet[self.packet_fill..self.packet_fill + copy].copy_from_slice(&data[..copy]);
            self.packet_fill += copy;
            data = &data[copy..];

            if self.packet_fill < TS_PACKET_SIZE {
                break;
            }

            self.packet_fill = 0;
            if !self.process_packet() {
                self.resynchronize();
                break;
            }
        }
        data
    }

    /// Handles one complete packet; returns `false` if sync was lost.
    fn process_packet(&mut self) -> bool {
        self.counters.packets_received += 1;

        let packet = self.packet;
        if packet[0] != TS_SYNC_BYTE {
            return false;
        }

        let pid = (u16::from(packet[1] & 0x1f) << 8) | u16::from(packet[2]);
        let flags = packet[3];

        if self.fill_statistics {
            *self.packet_statistics.entry(pid).or_insert(0) += 1;
        }

        if packet[1] & 0x80 != 0 {
            self.counters.transmission_errors += 1;
            return true;
        }

        if flags & 0xc0 != 0 {
            self.counters.scrambled += 1;
            return true;
        }

        let adaptation = flags & 0x20 != 0;
        let has_payload = flags & 0x10 != 0;
        let unit_start = packet[1] & 0x40 != 0;
        let counter = flags & 0x0f;

        let mut start = 4;
        let mut size = TS_PAYLOAD_SIZE;
        if adaptation {
            let skip = usize::from(packet[4]) + 1;
            if skip > size {
                // adaptation field longer than the packet
                self.counters.transmission_errors += 1;
                return true;
            }
            start += skip;
            size -= skip;
        }

        let no_increment = !has_payload;
        let size = if has_payload { size } else { 0 };

        if let Some(consumer) = self.consumers.get_mut(&pid) {
            let payload = PacketPayload {
                data: &packet[start..start + size],
                no_increment,
                unit_start,
                counter,
            };
            consumer.add_packet(&payload, &mut self.counters);
        }

        true
    }

    fn resynchronize(&mut self) {
        self.counters.resynchronized += 1;
        self.synchronized = false;
        self.sync_fill = 0;
        self.packet_fill = 0;

        for consumer in self.consumers.values_mut() {
            consumer.reset();
        }

        tracing::debug!(
            resynchronized = self.counters.resynchronized,
            "transport stream lost sync"
        );
    }
}

impl Default for TsPacketProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl PacketProcessor for TsPacketProcessor {
    fn submit(&mut self, data: &[u8]) {
        self.counters.bytes_received += data.len() as u64;
        self.counters.callbacks += 1;

        let mut data = data;
        while !data.is_empty() {
            data = if self.synchronized {
                self.feed(data)
            } else {
                self.synchronize(data)
            };
        }
    }

    fn set_filter(&mut self, pid: u16, is_control_data: bool, callback: UnitCallback) {
        self.consumers
            .insert(pid, UnitAssembler::new(is_control_data, callback));
    }

    fn remove_filter(&mut self, pid: u16) {
        self.consumers.remove(&pid);
    }

    fn has_filter(&self, pid: u16) -> bool {
        self.consumers.contains_key(&pid)
    }

    fn statistics(&self, pid: u16) -> PidStatistics {
        self.consumers
            .get(&pid)
            .map(UnitAssembler::statistics)
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
        for consumer in self.consumers.values_mut() {
            consumer.clear_statistics();
        }
    }
}
