//! The demultiplexing input endpoint.
//!
//! [`DemuxPin`] is the single entry point for upstream samples. While started
//! it feeds every sample to its [`PacketProcessor`], which dispatches
//! reassembled units to the registered consumers, and mirrors the raw bytes
//! to an optional capture file. Every sample is forwarded to the passthrough
//! [`OutputPin`] whether or not it was demultiplexed.
//!
//! # Locking
//!
//! The registration table, the processor and the capture file each sit
//! behind their own lock. Consumer callbacks run on the delivering thread
//! while the processor is locked. The processor lock is reentrant, so a
//! callback may call back into its pin: filter and statistics changes made
//! from a callback are queued and applied once the current sample has been
//! processed, and reads from a callback see zeroed values.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::{Mutex, ReentrantMutex};

use crate::capture::CaptureFile;
use crate::processor::{PacketProcessor, PidStatistics, ProcessorCounters, UnitCallback};
use crate::{
    BufferPool, DemuxConfig, DemuxError, DemuxEvent, DiagnosticSink, MediaFormat, OutputPin,
    Sample, TsPacketProcessor,
};

/// A consumer registered for one PID.
#[derive(Clone)]
struct Registration {
    is_control_data: bool,
    callback: UnitCallback,
}

/// Buffer pool negotiated with the upstream.
struct Allocator {
    pool: BufferPool,
    read_only: bool,
}

/// A processor change, applied at once or after the sample being processed.
enum ProcessorChange {
    Activate {
        pid: u16,
        is_control_data: bool,
        callback: UnitCallback,
    },
    Deactivate(u16),
    FillStatistics(bool),
    ClearStatistics,
    Stopped,
}

impl ProcessorChange {
    fn name(&self) -> &'static str {
        match self {
            Self::Activate { .. } => "activate",
            Self::Deactivate(_) => "deactivate",
            Self::FillStatistics(_) => "fill statistics",
            Self::ClearStatistics => "clear statistics",
            Self::Stopped => "stop",
        }
    }
}

/// Demultiplexing input endpoint.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use ts_demux_pin::{unit_callback, DemuxPin, MockProcessor, Sample};
///
/// let units = Arc::new(AtomicUsize::new(0));
/// let units_clone = units.clone();
///
/// let pin = DemuxPin::new(MockProcessor::new());
/// pin.register_consumer(100, false, unit_callback(move |_| {
///     units_clone.fetch_add(1, Ordering::SeqCst);
/// }));
/// pin.activate_consumer(100);
/// pin.start();
///
/// pin.deliver(&Sample::new(&[0u8; 10])).unwrap();
/// assert_eq!(units.load(Ordering::SeqCst), 1);
/// ```
pub struct DemuxPin<P: PacketProcessor> {
    processor: ReentrantMutex<RefCell<P>>,
    deferred: Mutex<Vec<ProcessorChange>>,
    registrations: Mutex<HashMap<u16, Registration>>,
    capture: Mutex<Option<CaptureFile>>,
    capturing: AtomicBool,
    capture_buffer_size: usize,
    running: AtomicBool,
    statistics: AtomicBool,
    dropped_samples: AtomicU64,
    diagnostics: Option<DiagnosticSink>,
    output: OutputPin,
    upstream: Mutex<Option<MediaFormat>>,
    allocator: Mutex<Option<Allocator>>,
}

impl DemuxPin<TsPacketProcessor> {
    /// Creates a pin backed by a [`TsPacketProcessor`] configured from `config`.
    pub fn transport_stream(config: &DemuxConfig) -> Self {
        Self::with_config(TsPacketProcessor::with_sync_count(config.sync_count), config)
    }
}

impl<P: PacketProcessor> DemuxPin<P> {
    /// Creates a stopped pin with the default configuration.
    pub fn new(processor: P) -> Self {
        Self::with_config(processor, &DemuxConfig::default())
    }

    /// Creates a stopped pin with the given configuration.
    pub fn with_config(mut processor: P, config: &DemuxConfig) -> Self {
        processor.set_fill_statistics(config.statistics);

        Self {
            processor: ReentrantMutex::new(RefCell::new(processor)),
            deferred: Mutex::new(Vec::new()),
            registrations: Mutex::new(HashMap::new()),
            capture: Mutex::new(None),
            capturing: AtomicBool::new(false),
            capture_buffer_size: config.capture_buffer_size,
            running: AtomicBool::new(false),
            statistics: AtomicBool::new(config.statistics),
            dropped_samples: AtomicU64::new(0),
            diagnostics: None,
            output: OutputPin::new(config.output_name.clone()),
            upstream: Mutex::new(None),
            allocator: Mutex::new(None),
        }
    }

    /// Sets the sink receiving diagnostic summaries.
    #[must_use]
    pub fn with_diagnostics(mut self, sink: DiagnosticSink) -> Self {
        self.diagnostics = Some(sink);
        self
    }

    fn emit(&self, event: &DemuxEvent) {
        if let Some(ref sink) = self.diagnostics {
            sink(event);
        }
    }

    fn emit_all(&self, events: &[DemuxEvent]) {
        for event in events {
            self.emit(event);
        }
    }

    /// Applies `change` now, or queues it if the processor is busy
    /// dispatching on this thread.
    fn change_processor(&self, change: ProcessorChange) {
        let events = {
            let guard = self.processor.lock();
            let Ok(mut processor) = guard.try_borrow_mut() else {
                tracing::debug!(change = change.name(), "processor busy, change deferred");
                self.deferred.lock().push(change);
                return;
            };
            self.apply(&mut processor, change)
        };

        self.emit_all(&events);
    }

    /// Reads from the processor; zeroed values while it is dispatching.
    fn read_processor<R: Default>(&self, f: impl FnOnce(&P) -> R) -> R {
        let guard = self.processor.lock();
        let value = match guard.try_borrow() {
            Ok(processor) => f(&*processor),
            Err(_) => R::default(),
        };
        value
    }

    fn apply(&self, processor: &mut P, change: ProcessorChange) -> Vec<DemuxEvent> {
        match change {
            ProcessorChange::Activate {
                pid,
                is_control_data,
                callback,
            } => {
                processor.set_filter(pid, is_control_data, callback);
                tracing::debug!(pid, "consumer activated");
                Vec::new()
            }
            ProcessorChange::Deactivate(pid) => {
                let statistics = processor.statistics(pid);
                processor.remove_filter(pid);

                if self.statistics_enabled() && statistics.count > 0 {
                    vec![DemuxEvent::PidSummary { pid, statistics }]
                } else {
                    Vec::new()
                }
            }
            ProcessorChange::FillStatistics(enabled) => {
                processor.set_fill_statistics(enabled);
                Vec::new()
            }
            ProcessorChange::ClearStatistics => {
                processor.clear_statistics();
                Vec::new()
            }
            ProcessorChange::Stopped => self.summaries(processor),
        }
    }

    /// Applies the changes queued by consumer callbacks.
    fn apply_deferred(&self, processor: &mut P) -> Vec<DemuxEvent> {
        let deferred = std::mem::take(&mut *self.deferred.lock());
        deferred
            .into_iter()
            .flat_map(|change| self.apply(processor, change))
            .collect()
    }

    /// Accepts one sample from the upstream.
    ///
    /// While stopped the sample is not demultiplexed, but it is always
    /// forwarded to the output. Empty samples are dropped and counted.
    ///
    /// # Errors
    ///
    /// Stream problems and capture failures are counted or reported as
    /// events; no error is currently returned.
    pub fn deliver(&self, sample: &Sample<'_>) -> Result<(), DemuxError> {
        if self.is_running() {
            self.demultiplex(sample);
        }

        self.output.forward(sample);
        Ok(())
    }

    /// Delivers a batch of samples in order; returns how many were processed.
    pub fn deliver_multiple(&self, samples: &[Sample<'_>]) -> usize {
        let mut processed = 0;
        for sample in samples {
            if self.deliver(sample).is_err() {
                break;
            }
            processed += 1;
        }
        processed
    }

    fn demultiplex(&self, sample: &Sample<'_>) {
        if sample.is_empty() {
            self.dropped_samples.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let payload = sample.to_owned_payload();

        let events = {
            let guard = self.processor.lock();
            // stop() may have won the race for the lock
            if !self.is_running() {
                return;
            }
            let Ok(mut processor) = guard.try_borrow_mut() else {
                tracing::warn!(
                    bytes = payload.len(),
                    "sample delivered from a consumer callback, not demultiplexed"
                );
                return;
            };

            processor.submit(&payload);
            self.apply_deferred(&mut processor)
        };

        self.emit_all(&events);
        self.write_capture(&payload);
    }

    fn write_capture(&self, payload: &[u8]) {
        if !self.capturing.load(Ordering::Acquire) {
            return;
        }

        let mut capture = self.capture.lock();
        let Some(file) = capture.as_mut() else {
            return;
        };

        let Err(e) = file.write(payload) else {
            return;
        };

        let path = file.path().to_path_buf();
        tracing::warn!(path = %path.display(), error = %e, "capture write failed, capture disabled");

        self.capturing.store(false, Ordering::Release);
        let failed = capture.take();
        drop(capture);
        drop(failed);

        self.emit(&DemuxEvent::CaptureFailed {
            path,
            error: e.to_string(),
        });
    }

    /// Registers or replaces the consumer for `pid`.
    ///
    /// Does not start delivery; a replaced consumer that is active keeps
    /// receiving until the PID is activated again.
    pub fn register_consumer(&self, pid: u16, is_control_data: bool, callback: UnitCallback) {
        let replaced = self.registrations.lock().insert(
            pid,
            Registration {
                is_control_data,
                callback,
            },
        );

        tracing::debug!(pid, is_control_data, replaced = replaced.is_some(), "consumer registered");
    }

    /// Starts dispatching units of `pid` to its registered consumer.
    ///
    /// Does nothing if no consumer is registered for `pid`. Called from a
    /// consumer callback, takes effect after the current sample.
    pub fn activate_consumer(&self, pid: u16) {
        let Some(registration) = self.registrations.lock().get(&pid).cloned() else {
            return;
        };

        self.change_processor(ProcessorChange::Activate {
            pid,
            is_control_data: registration.is_control_data,
            callback: registration.callback,
        });
    }

    /// Stops dispatching units of `pid`; the registration is kept.
    ///
    /// With statistics enabled, a [`DemuxEvent::PidSummary`] is emitted if
    /// the PID saw any data. Called from a consumer callback, takes effect
    /// after the current sample.
    ///
    /// ```
    /// use std::sync::{Arc, Weak};
    /// use ts_demux_pin::{unit_callback, DemuxPin, MockProcessor, Sample};
    ///
    /// // a one-shot table reader
    /// let pin = Arc::new_cyclic(|me: &Weak<DemuxPin<MockProcessor>>| {
    ///     let me = me.clone();
    ///     let pin = DemuxPin::new(MockProcessor::new());
    ///     pin.register_consumer(0, true, unit_callback(move |_| {
    ///         if let Some(pin) = me.upgrade() {
    ///             pin.deactivate_consumer(0);
    ///         }
    ///     }));
    ///     pin
    /// });
    /// pin.activate_consumer(0);
    /// pin.start();
    ///
    /// pin.deliver(&Sample::new(&[0u8; 8])).unwrap();
    /// assert!(!pin.is_active(0));
    /// ```
    pub fn deactivate_consumer(&self, pid: u16) {
        self.change_processor(ProcessorChange::Deactivate(pid));
    }

    /// Deactivates `pid` and forgets its consumer.
    pub fn unregister_consumer(&self, pid: u16) {
        self.deactivate_consumer(pid);

        if self.registrations.lock().remove(&pid).is_some() {
            tracing::debug!(pid, "consumer unregistered");
        }
    }

    /// Unregisters every consumer.
    pub fn unregister_all(&self) {
        for pid in self.registered_pids() {
            self.unregister_consumer(pid);
        }
    }

    /// Registered PIDs in ascending order.
    pub fn registered_pids(&self) -> Vec<u16> {
        let mut pids: Vec<u16> = self.registrations.lock().keys().copied().collect();
        pids.sort_unstable();
        pids
    }

    /// Returns `true` if a consumer for `pid` is registered.
    pub fn is_registered(&self, pid: u16) -> bool {
        self.registrations.lock().contains_key(&pid)
    }

    /// Returns `true` if units of `pid` are being dispatched.
    pub fn is_active(&self, pid: u16) -> bool {
        self.read_processor(|processor| processor.has_filter(pid))
    }

    /// Mirrors all further demultiplexed bytes to a new capture file.
    ///
    /// A capture already running is flushed and closed first.
    ///
    /// # Errors
    ///
    /// Returns [`DemuxError::CaptureIo`] if the file cannot be created; no
    /// capture is active afterwards.
    pub fn start_capture(&self, path: impl AsRef<Path>) -> Result<(), DemuxError> {
        let mut capture = self.capture.lock();

        self.capturing.store(false, Ordering::Release);
        if let Some(previous) = capture.take() {
            close_capture(previous);
        }

        let file = CaptureFile::create(path, self.capture_buffer_size)?;
        tracing::info!(path = %file.path().display(), "capture started");

        *capture = Some(file);
        self.capturing.store(true, Ordering::Release);
        Ok(())
    }

    /// Flushes and closes the capture file, if any.
    pub fn stop_capture(&self) {
        self.capturing.store(false, Ordering::Release);

        let previous = self.capture.lock().take();
        if let Some(file) = previous {
            close_capture(file);
        }
    }

    /// Returns `true` while a capture file is open.
    pub fn is_capturing(&self) -> bool {
        self.capture.lock().is_some()
    }

    /// Path of the open capture file.
    pub fn capture_path(&self) -> Option<PathBuf> {
        self.capture
            .lock()
            .as_ref()
            .map(|file| file.path().to_path_buf())
    }

    /// Starts demultiplexing delivered samples.
    pub fn start(&self) {
        if !self.running.swap(true, Ordering::AcqRel) {
            tracing::info!("demultiplexing started");
        }
    }

    /// Stops demultiplexing.
    ///
    /// Once this returns, no unit is dispatched until the next
    /// [`start`](Self::start). With statistics enabled, an aggregate summary,
    /// a summary for every active PID and the packet counts are emitted.
    ///
    /// Called from a consumer callback, the rest of the current sample is
    /// still dispatched and the summaries follow once it is done.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }

        // waits for an in-flight submit
        self.change_processor(ProcessorChange::Stopped);
    }

    fn summaries(&self, processor: &P) -> Vec<DemuxEvent> {
        let counters = processor.counters();
        let forwarded = self.output.samples_received();

        tracing::info!(
            packets = counters.packets_received,
            bytes = counters.bytes_received,
            forwarded,
            "demultiplexing stopped"
        );

        if !self.statistics_enabled() {
            return Vec::new();
        }

        let mut events = vec![DemuxEvent::AggregateSummary {
            counters,
            forwarded,
        }];

        events.extend(
            self.registered_pids()
                .into_iter()
                .filter(|&pid| processor.has_filter(pid))
                .map(|pid| DemuxEvent::PidSummary {
                    pid,
                    statistics: processor.statistics(pid),
                }),
        );

        events.extend(
            processor
                .packet_statistics()
                .into_iter()
                .map(|(pid, packets)| DemuxEvent::PacketCount { pid, packets }),
        );

        events
    }

    /// Returns `true` while started.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Enables or disables statistics collection and summaries.
    ///
    /// Per-PID packet counts restart from zero.
    pub fn set_statistics(&self, enabled: bool) {
        self.statistics.store(enabled, Ordering::Release);
        self.change_processor(ProcessorChange::FillStatistics(enabled));
    }

    /// Returns `true` if statistics are collected.
    pub fn statistics_enabled(&self) -> bool {
        self.statistics.load(Ordering::Acquire)
    }

    /// Unit statistics of `pid`.
    pub fn statistics(&self, pid: u16) -> PidStatistics {
        self.read_processor(|processor| processor.statistics(pid))
    }

    /// Aggregate counters of the processor.
    pub fn counters(&self) -> ProcessorCounters {
        self.read_processor(PacketProcessor::counters)
    }

    /// Per-PID packet counts, sorted by PID.
    pub fn packet_statistics(&self) -> Vec<(u16, u64)> {
        self.read_processor(PacketProcessor::packet_statistics)
    }

    /// Resets all processor statistics.
    pub fn clear_statistics(&self) {
        self.change_processor(ProcessorChange::ClearStatistics);
    }

    /// Empty samples dropped while started.
    pub fn dropped_samples(&self) -> u64 {
        self.dropped_samples.load(Ordering::Relaxed)
    }

    /// Runs `f` with exclusive access to the processor.
    ///
    /// Returns `None` when called from a consumer callback.
    pub fn with_processor<R>(&self, f: impl FnOnce(&mut P) -> R) -> Option<R> {
        let (value, events) = {
            let guard = self.processor.lock();
            let mut processor = guard.try_borrow_mut().ok()?;
            let value = f(&mut *processor);
            (value, self.apply_deferred(&mut processor))
        };

        self.emit_all(&events);
        Some(value)
    }

    /// The passthrough output.
    pub fn output(&self) -> &OutputPin {
        &self.output
    }

    /// Records the upstream connection and its format.
    ///
    /// An existing upstream connection is released first.
    pub fn receive_connection(&self, format: &MediaFormat) {
        self.disconnect_upstream();
        *self.upstream.lock() = Some(format.clone());
        tracing::debug!(%format, "upstream connected");
    }

    /// Format of the upstream connection.
    pub fn upstream_format(&self) -> Option<MediaFormat> {
        self.upstream.lock().clone()
    }

    /// Releases the upstream connection and its buffer pool.
    pub fn disconnect_upstream(&self) {
        self.allocator.lock().take();
        if self.upstream.lock().take().is_some() {
            tracing::debug!("upstream disconnected");
        }
    }

    /// Returns `true` for every format; the upstream decides what it sends.
    pub fn accepts(&self, _format: &MediaFormat) -> bool {
        true
    }

    /// Formats this endpoint advertises, preferred first.
    pub fn formats(&self) -> Vec<MediaFormat> {
        MediaFormat::transport_formats()
    }

    /// The buffer pool used by the upstream, created on first request.
    pub fn allocator(&self) -> BufferPool {
        self.allocator
            .lock()
            .get_or_insert_with(|| Allocator {
                pool: BufferPool::default(),
                read_only: false,
            })
            .pool
            .clone()
    }

    /// Adopts the buffer pool chosen by the upstream.
    ///
    /// The pool is also handed to the downstream receiver, if connected.
    pub fn notify_allocator(&self, pool: &BufferPool, read_only: bool) {
        let properties = pool.properties();
        tracing::debug!(
            pool = pool.id(),
            buffer_count = properties.buffer_count,
            buffer_size = properties.buffer_size,
            read_only,
            "upstream buffer pool adopted"
        );

        *self.allocator.lock() = Some(Allocator {
            pool: pool.clone(),
            read_only,
        });
        self.output.set_buffer_pool(pool);
    }

    /// Returns `true` if the upstream marked its buffers read-only.
    pub fn allocator_read_only(&self) -> bool {
        self.allocator
            .lock()
            .as_ref()
            .is_some_and(|allocator| allocator.read_only)
    }
}

impl<P: PacketProcessor> fmt::Debug for DemuxPin<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DemuxPin")
            .field("running", &self.is_running())
            .field("registered", &self.registered_pids())
            .field("capture", &self.capture_path())
            .field("output", &self.output)
            .finish_non_exhaustive()
    }
}

fn close_capture(file: CaptureFile) {
    let path = file.path().to_path_buf();
    let bytes = file.total_bytes_written();

    match file.close() {
        Ok(()) => tracing::info!(path = %path.display(), bytes, "capture stopped"),
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "capture flush failed"),
    }
}
