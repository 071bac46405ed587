//! Lifecycle of the demultiplexing node.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::processor::PacketProcessor;
use crate::{
    Connection, DemuxConfig, DemuxError, DemuxPin, InputReceiver, MediaFormat,
    OutputPin, Sample, TsPacketProcessor,
};

/// Coarse state of a [`DemuxNode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LifecycleState {
    /// Not processing; no consumers, no downstream connection.
    #[default]
    Idle,
    /// Ready, but not processing samples.
    Paused,
    /// Processing samples.
    Active,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Paused => "paused",
            Self::Active => "active",
        };
        f.write_str(name)
    }
}

/// A demultiplexing node: one [`DemuxPin`] plus its lifecycle.
///
/// The host drives the lifecycle with [`pause`](Self::pause),
/// [`run`](Self::run) and [`stop`](Self::stop), and pushes samples with
/// [`deliver`](Self::deliver). Samples pushed while not active are accepted
/// and forwarded, but never demultiplexed.
///
/// # Example
///
/// ```
/// use ts_demux_pin::{DemuxConfig, DemuxNode, LifecycleState};
///
/// let node = DemuxNode::transport_stream(&DemuxConfig::default());
/// node.run();
/// assert_eq!(node.current_state(), LifecycleState::Active);
///
/// let packet = [0x47u8, 0x1f, 0xff, 0x10];
/// assert_eq!(node.deliver(&packet, 0, packet.len()), 0);
///
/// node.stop();
/// assert_eq!(node.current_state(), LifecycleState::Idle);
/// ```
pub struct DemuxNode<P: PacketProcessor> {
    pin: DemuxPin<P>,
    // serializes pause/run/stop; `state` is only locked to read or set it
    lifecycle: Mutex<()>,
    state: Mutex<LifecycleState>,
}

impl DemuxNode<TsPacketProcessor> {
    /// Creates a node backed by a [`TsPacketProcessor`].
    pub fn transport_stream(config: &DemuxConfig) -> Self {
        Self::from_pin(DemuxPin::transport_stream(config))
    }
}

impl<P: PacketProcessor> DemuxNode<P> {
    /// Creates an idle node with the default configuration.
    pub fn new(processor: P) -> Self {
        Self::with_config(processor, &DemuxConfig::default())
    }

    /// Creates an idle node with the given configuration.
    pub fn with_config(processor: P, config: &DemuxConfig) -> Self {
        Self::from_pin(DemuxPin::with_config(processor, config))
    }

    /// Wraps an already configured pin, e.g. one with a diagnostic sink.
    ///
    /// ```
    /// use ts_demux_pin::{tracing_diagnostics, DemuxNode, DemuxPin, MockProcessor};
    ///
    /// let pin = DemuxPin::new(MockProcessor::new()).with_diagnostics(tracing_diagnostics());
    /// let node = DemuxNode::from_pin(pin);
    /// ```
    pub fn from_pin(pin: DemuxPin<P>) -> Self {
        Self {
            pin,
            lifecycle: Mutex::new(()),
            state: Mutex::new(LifecycleState::Idle),
        }
    }

    /// The demultiplexing endpoint.
    pub fn pin(&self) -> &DemuxPin<P> {
        &self.pin
    }

    /// The passthrough output.
    pub fn output(&self) -> &OutputPin {
        self.pin.output()
    }

    /// Current lifecycle state.
    ///
    /// Safe to call from a diagnostic sink while a transition is running;
    /// the old state is reported until the transition completes.
    pub fn current_state(&self) -> LifecycleState {
        *self.state.lock()
    }

    /// Moves to [`LifecycleState::Paused`].
    ///
    /// Leaving `Active` stops demultiplexing before the state changes.
    pub fn pause(&self) {
        let _lifecycle = self.lifecycle.lock();
        self.enter_paused();
    }

    /// Moves to [`LifecycleState::Active`], pausing first when idle.
    pub fn run(&self) {
        let _lifecycle = self.lifecycle.lock();
        if self.current_state() == LifecycleState::Active {
            return;
        }

        self.enter_paused();
        self.pin.start();
        self.transition(LifecycleState::Active);
    }

    /// Moves to [`LifecycleState::Idle`] and resets the node.
    ///
    /// Demultiplexing stops before the state changes. The downstream
    /// connection is released and all consumers are unregistered, so
    /// consumers must be registered again before the next run.
    pub fn stop(&self) {
        let _lifecycle = self.lifecycle.lock();

        if self.current_state() == LifecycleState::Active {
            self.pin.stop();
        }

        self.pin.output().disconnect();
        self.pin.unregister_all();

        self.transition(LifecycleState::Idle);
    }

    fn enter_paused(&self) {
        match self.current_state() {
            LifecycleState::Idle => self.verify_resources(),
            LifecycleState::Active => self.pin.stop(),
            LifecycleState::Paused => return,
        }
        self.transition(LifecycleState::Paused);
    }

    fn transition(&self, next: LifecycleState) {
        let mut state = self.state.lock();
        if *state != next {
            tracing::info!(from = %*state, to = %next, "node state changed");
            *state = next;
        }
    }

    /// Nothing has to be allocated before data flows; the processor is
    /// owned by the pin from construction on.
    fn verify_resources(&self) {
        tracing::debug!(
            output = self.pin.output().name(),
            consumers = self.pin.registered_pids().len(),
            "resources ready"
        );
    }

    /// Host entry point for one sample inside `buffer`.
    ///
    /// Returns `0` when the sample was accepted (including silently dropped
    /// samples) and a negative status if `(offset, length)` lies outside the
    /// buffer.
    pub fn deliver(&self, buffer: &[u8], offset: usize, length: usize) -> i32 {
        let result =
            Sample::from_parts(buffer, offset, length).and_then(|sample| self.pin.deliver(&sample));

        match result {
            Ok(()) => 0,
            Err(e) => {
                tracing::debug!(error = %e, "sample rejected");
                e.status()
            }
        }
    }

    /// Returns `true` if the upstream may connect with `format`.
    pub fn propose_format(&self, format: &MediaFormat) -> bool {
        self.pin.accepts(format)
    }

    /// Connects the passthrough output to a downstream receiver.
    ///
    /// # Errors
    ///
    /// Returns [`DemuxError::FormatMismatch`] if the receiver does not
    /// accept `format`.
    pub fn connect(
        &self,
        receiver: Arc<dyn InputReceiver>,
        format: &MediaFormat,
    ) -> Result<Connection, DemuxError> {
        self.pin
            .output()
            .negotiate_connection(receiver, std::slice::from_ref(format))
    }

    /// Releases the downstream connection.
    pub fn disconnect(&self) {
        self.pin.output().disconnect();
    }
}

impl<P: PacketProcessor> Drop for DemuxNode<P> {
    fn drop(&mut self) {
        self.pin.stop();
        self.pin.stop_capture();
        self.pin.output().disconnect();
    }
}

impl<P: PacketProcessor> fmt::Debug for DemuxNode<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DemuxNode")
            .field("state", &self.current_state())
            .field("pin", &self.pin)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{diagnostic_sink, unit_callback, CountingReceiver, DemuxEvent, MockProcessor};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_consumer(node: &DemuxNode<MockProcessor>, pid: u16) -> Arc<AtomicUsize> {
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();
        node.pin().register_consumer(
            pid,
            false,
            unit_callback(move |_| {
                count_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );
        node.pin().activate_consumer(pid);
        count
    }

    #[test]
    fn test_initial_state_is_idle() {
        let node = DemuxNode::new(MockProcessor::new());
        assert_eq!(node.current_state(), LifecycleState::Idle);
        assert!(!node.pin().is_running());
    }

    #[test]
    fn test_pause_run_pause_stop() {
        let node = DemuxNode::new(MockProcessor::new());

        node.pause();
        assert_eq!(node.current_state(), LifecycleState::Paused);
        assert!(!node.pin().is_running());

        node.run();
        assert_eq!(node.current_state(), LifecycleState::Active);
        assert!(node.pin().is_running());

        node.pause();
        assert_eq!(node.current_state(), LifecycleState::Paused);
        assert!(!node.pin().is_running());

        node.stop();
        assert_eq!(node.current_state(), LifecycleState::Idle);
    }

    #[test]
    fn test_run_from_idle_pauses_implicitly() {
        let node = DemuxNode::new(MockProcessor::new());
        node.run();
        node.run();
        assert_eq!(node.current_state(), LifecycleState::Active);
    }

    #[test]
    fn test_deliver_only_demultiplexes_when_active() {
        let node = DemuxNode::new(MockProcessor::new());
        let count = counting_consumer(&node, 100);
        let buffer = [0u8; 16];

        assert_eq!(node.deliver(&buffer, 0, 16), 0);
        node.pause();
        assert_eq!(node.deliver(&buffer, 0, 16), 0);
        assert_eq!(count.load(Ordering::SeqCst), 0);

        node.run();
        assert_eq!(node.deliver(&buffer, 4, 8), 0);
        assert_eq!(count.load(Ordering::SeqCst), 1);

        node.pause();
        node.deliver(&buffer, 0, 16);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_deliver_invalid_bounds_is_negative() {
        let node = DemuxNode::new(MockProcessor::new());
        node.run();
        assert!(node.deliver(&[0u8; 4], 2, 8) < 0);
        assert_eq!(node.output().samples_received(), 0);
    }

    #[test]
    fn test_stop_is_hard_reset() {
        let node = DemuxNode::new(MockProcessor::new());
        counting_consumer(&node, 100);
        node.connect(
            Arc::new(CountingReceiver::new("tif")),
            &MediaFormat::transport_stream(),
        )
        .unwrap();
        node.run();

        node.stop();

        assert!(node.pin().registered_pids().is_empty());
        assert!(!node.output().is_connected());
        assert_eq!(node.pin().statistics(100).count, 0);
    }

    #[test]
    fn test_stop_from_active_emits_statistics_once() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let events_clone = events.clone();
        let config = DemuxConfig {
            statistics: true,
            ..Default::default()
        };
        let pin = DemuxPin::with_config(MockProcessor::new(), &config)
            .with_diagnostics(diagnostic_sink(move |event| events_clone.lock().push(event.clone())));
        let node = DemuxNode::from_pin(pin);
        counting_consumer(&node, 100);
        node.run();
        node.deliver(&[0u8; 5], 0, 5);

        node.stop();

        let events = events.lock();
        let aggregates = events
            .iter()
            .filter(|event| matches!(event, DemuxEvent::AggregateSummary { .. }))
            .count();
        assert_eq!(aggregates, 1);
    }

    #[test]
    fn test_diagnostic_sink_may_query_state() {
        let node_slot: Arc<std::sync::OnceLock<std::sync::Weak<DemuxNode<MockProcessor>>>> =
            Arc::default();
        let states = Arc::new(Mutex::new(Vec::new()));

        let slot = node_slot.clone();
        let states_clone = states.clone();
        let config = DemuxConfig {
            statistics: true,
            ..Default::default()
        };
        let pin = DemuxPin::with_config(MockProcessor::new(), &config).with_diagnostics(
            diagnostic_sink(move |_| {
                if let Some(node) = slot.get().and_then(std::sync::Weak::upgrade) {
                    states_clone.lock().push(node.current_state());
                }
            }),
        );
        let node = Arc::new(DemuxNode::from_pin(pin));
        node_slot.set(Arc::downgrade(&node)).unwrap();

        counting_consumer(&node, 100);
        node.run();
        node.deliver(&[0u8; 5], 0, 5);
        node.stop();

        assert_eq!(node.current_state(), LifecycleState::Idle);
        let states = states.lock();
        assert!(!states.is_empty());
        assert!(states.iter().all(|&state| state == LifecycleState::Active));
    }

    #[test]
    fn test_connect_and_disconnect() {
        let node = DemuxNode::new(MockProcessor::new());
        let receiver = Arc::new(CountingReceiver::new("tif"));

        assert!(node.propose_format(&MediaFormat::transport_stream()));
        let connection = node
            .connect(receiver.clone(), &MediaFormat::bda_transport())
            .unwrap();
        assert_eq!(connection.format, MediaFormat::bda_transport());

        node.deliver(&[0u8; 3], 0, 3);
        node.disconnect();
        node.deliver(&[0u8; 3], 0, 3);

        assert_eq!(receiver.samples(), 1);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(LifecycleState::Paused.to_string(), "paused");
    }
}
