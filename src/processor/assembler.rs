//! Per-PID reassembly of PES packets and PSI sections.

use super::{PidStatistics, ProcessorCounters, UnitCallback};

/// Length of the fixed PES header up to and including the length field.
const PES_HEADER_SIZE: usize = 6;

/// PES start code prefix.
const PES_START_CODE: [u8; 3] = [0x00, 0x00, 0x01];

/// Bytes of a section header up to and including the section length.
const SECTION_HEADER_SIZE: usize = 3;

/// Payload of one packet as seen by an assembler.
pub(crate) struct PacketPayload<'a> {
    pub data: &'a [u8],
    /// Adaptation-only packet; the continuity counter does not advance.
    pub no_increment: bool,
    /// Payload unit start indicator.
    pub unit_start: bool,
    pub counter: u8,
}

/// Dispatches finished units and keeps their statistics.
struct UnitSink {
    callback: UnitCallback,
    statistics: PidStatistics,
}

impl UnitSink {
    fn emit(&mut self, unit: &[u8]) {
        self.statistics.record(unit.len());
        (self.callback)(unit);
    }
}

/// Reassembles one PID's units from its packets.
pub(crate) struct UnitAssembler {
    sink: UnitSink,
    kind: AssemblerKind,
}

enum AssemblerKind {
    Pes(PesState),
    Section(SectionState),
}

impl UnitAssembler {
    pub fn new(is_control_data: bool, callback: UnitCallback) -> Self {
        let kind = if is_control_data {
            AssemblerKind::Section(SectionState::default())
        } else {
            AssemblerKind::Pes(PesState::default())
        };

        Self {
            sink: UnitSink {
                callback,
                statistics: PidStatistics::default(),
            },
            kind,
        }
    }

    pub fn statistics(&self) -> PidStatistics {
        self.sink.statistics
    }

    pub fn clear_statistics(&mut self) {
        self.sink.statistics = PidStatistics::default();
    }

    /// Drops any partially collected unit.
    pub fn reset(&mut self) {
        match &mut self.kind {
            AssemblerKind::Pes(state) => state.reset(),
            AssemblerKind::Section(state) => state.collector = None,
        }
    }

    pub fn add_packet(&mut self, packet: &PacketPayload<'_>, counters: &mut ProcessorCounters) {
        match &mut self.kind {
            AssemblerKind::Pes(state) => state.add_packet(packet, counters, &mut self.sink),
            AssemblerKind::Section(state) => state.add_packet(packet, counters, &mut self.sink),
        }
    }
}

#[derive(Default)]
struct PesState {
    buffer: Vec<u8>,
    collecting: bool,
    expected_counter: u8,
    /// Full unit size when the PES header declares a length.
    declared_size: Option<usize>,
}

impl PesState {
    fn reset(&mut self) {
        self.buffer.clear();
        self.collecting = false;
        self.declared_size = None;
    }

    fn add_packet(
        &mut self,
        packet: &PacketPayload<'_>,
        counters: &mut ProcessorCounters,
        sink: &mut UnitSink,
    ) {
        if packet.no_increment {
            return;
        }

        if packet.unit_start {
            if self.collecting && !self.buffer.is_empty() {
                if self.declared_size.is_some() {
                    // declared length never reached
                    counters.corrupted_stream += 1;
                } else {
                    sink.emit(&self.buffer);
                }
            }

            self.reset();
            self.collecting = true;
            self.expected_counter = next_counter(packet.counter);
            self.buffer.extend_from_slice(packet.data);
            self.complete(sink);
            return;
        }

        if !self.collecting {
            return;
        }

        if packet.counter != self.expected_counter {
            counters.corrupted_stream += 1;
            self.reset();
            return;
        }

        self.expected_counter = next_counter(self.expected_counter);
        self.buffer.extend_from_slice(packet.data);
        self.complete(sink);
    }

    fn complete(&mut self, sink: &mut UnitSink) {
        if self.declared_size.is_none() && self.buffer.len() >= PES_HEADER_SIZE {
            self.declared_size = declared_pes_size(&self.buffer);
        }

        let Some(size) = self.declared_size else {
            return;
        };

        if self.buffer.len() >= size {
            sink.emit(&self.buffer[..size]);
            self.reset();
        }
    }
}

/// Unit size from the PES packet length field; `None` for unbounded units.
fn declared_pes_size(header: &[u8]) -> Option<usize> {
    if header[..3] != PES_START_CODE {
        return None;
    }

    let length = usize::from(u16::from_be_bytes([header[4], header[5]]));
    (length > 0).then_some(length + PES_HEADER_SIZE)
}

struct SectionCollector {
    data: Vec<u8>,
    size: usize,
}

impl SectionCollector {
    fn remaining(&self) -> usize {
        self.size - self.data.len()
    }
}

#[derive(Default)]
struct SectionState {
    collector: Option<SectionCollector>,
    expected_counter: u8,
}

impl SectionState {
    fn add_packet(
        &mut self,
        packet: &PacketPayload<'_>,
        counters: &mut ProcessorCounters,
        sink: &mut UnitSink,
    ) {
        let mut data = packet.data;

        if self.collector.is_none() || packet.unit_start {
            if !packet.unit_start {
                return;
            }

            let Some((&pointer, rest)) = data.split_first() else {
                self.corrupted(counters);
                return;
            };
            let pointer = usize::from(pointer);

            // Tail of the previous section sits in front of the pointer target.
            if let Some(mut previous) = self.collector.take() {
                if pointer > 0 && rest.len() >= pointer && previous.remaining() == pointer {
                    previous.data.extend_from_slice(&rest[..pointer]);
                    sink.emit(&previous.data);
                }
            }

            let Some(section) = rest.get(pointer..) else {
                self.corrupted(counters);
                return;
            };

            if section.len() < SECTION_HEADER_SIZE {
                self.corrupted(counters);
                return;
            }

            let length = (usize::from(section[1] & 0x0f) << 8) | usize::from(section[2]);
            if length < SECTION_HEADER_SIZE {
                self.corrupted(counters);
                return;
            }

            let size = SECTION_HEADER_SIZE + length;
            self.collector = Some(SectionCollector {
                data: Vec::with_capacity(size),
                size,
            });
            self.expected_counter = packet.counter;
            data = section;
        }

        if packet.counter != self.expected_counter {
            self.corrupted(counters);
            return;
        }
        self.expected_counter = next_counter(self.expected_counter);

        let Some(collector) = self.collector.as_mut() else {
            return;
        };

        let copy = collector.remaining().min(data.len());
        collector.data.extend_from_slice(&data[..copy]);
        if collector.remaining() > 0 {
            return;
        }

        if let Some(finished) = self.collector.take() {
            sink.emit(&finished.data);
        }
    }

    fn corrupted(&mut self, counters: &mut ProcessorCounters) {
        counters.corrupted_table += 1;
        self.collector = None;
    }
}

fn next_counter(counter: u8) -> u8 {
    (counter + 1) & 0x0f
}
