//! Passthrough output endpoint.
//!
//! The [`OutputPin`] relays every sample it is given to one downstream
//! [`InputReceiver`]. The receiver's entry points are resolved once when the
//! connection is made and cached, so forwarding a sample is a single
//! indirect call with no lock on the way.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use parking_lot::Mutex;

use crate::{BufferPool, DemuxError, MediaFormat, Sample};

/// Direct call target receiving one forwarded sample.
pub type SampleTarget = Arc<dyn Fn(&Sample<'_>) + Send + Sync>;

/// Direct call target receiving a new shared buffer pool.
pub type PoolTarget = Arc<dyn Fn(&BufferPool) + Send + Sync>;

/// Creates a [`SampleTarget`] from a closure.
pub fn sample_target<F>(f: F) -> SampleTarget
where
    F: Fn(&Sample<'_>) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Creates a [`PoolTarget`] from a closure.
pub fn pool_target<F>(f: F) -> PoolTarget
where
    F: Fn(&BufferPool) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// The two entry points a downstream receiver exposes for the fast path.
#[derive(Clone)]
pub struct EntryPoints {
    /// Receives one sample.
    pub receive: SampleTarget,
    /// Receives a changed buffer pool.
    pub notify_pool: PoolTarget,
}

impl fmt::Debug for EntryPoints {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntryPoints").finish_non_exhaustive()
    }
}

/// A downstream endpoint that can be connected to an [`OutputPin`].
///
/// # Example
///
/// ```
/// use ts_demux_pin::{pool_target, sample_target, EntryPoints, InputReceiver, MediaFormat};
///
/// struct PrintReceiver;
///
/// impl InputReceiver for PrintReceiver {
///     fn name(&self) -> &str {
///         "print"
///     }
///
///     fn accepts(&self, format: &MediaFormat) -> bool {
///         format.is_transport_stream()
///     }
///
///     fn entry_points(&self) -> Option<EntryPoints> {
///         Some(EntryPoints {
///             receive: sample_target(|sample| println!("{} bytes", sample.len())),
///             notify_pool: pool_target(|_| {}),
///         })
///     }
/// }
/// ```
pub trait InputReceiver: Send + Sync {
    /// Human-readable name for logging.
    fn name(&self) -> &str;

    /// Returns `true` if the receiver can take samples of this format.
    fn accepts(&self, format: &MediaFormat) -> bool;

    /// Called once the format of a new connection is fixed.
    ///
    /// Default implementation does nothing.
    fn receive_connection(&self, _format: &MediaFormat) {}

    /// Resolves the receiver's direct call targets.
    ///
    /// Called once per connection. A receiver returning `None` stays
    /// connected but receives nothing.
    fn entry_points(&self) -> Option<EntryPoints>;
}

/// The negotiated link between an output and one downstream receiver.
#[derive(Clone)]
pub struct Connection {
    /// The connected receiver.
    pub receiver: Arc<dyn InputReceiver>,
    /// Format agreed for the connection.
    pub format: MediaFormat,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("receiver", &self.receiver.name())
            .field("format", &self.format)
            .finish()
    }
}

/// Passthrough output of the demultiplexing node.
///
/// # Caller contract
///
/// [`connect`](Self::connect) and [`disconnect`](Self::disconnect) are the
/// only writers of the cached entry points. They should not run while a
/// [`forward`](Self::forward) is in flight; the node lifecycle takes care of
/// that. A racing forward may reach the previous receiver one last time but
/// never touches freed state.
pub struct OutputPin {
    name: String,
    connection: Mutex<Option<Connection>>,
    pool: Mutex<Option<BufferPool>>,
    targets: ArcSwapOption<EntryPoints>,
    samples_received: AtomicU64,
}

impl OutputPin {
    /// Creates an unconnected output with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            connection: Mutex::new(None),
            pool: Mutex::new(None),
            targets: ArcSwapOption::empty(),
            samples_received: AtomicU64::new(0),
        }
    }

    /// Name of this output.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Formats this output can produce, preferred first.
    pub fn formats(&self) -> Vec<MediaFormat> {
        MediaFormat::transport_formats()
    }

    /// Picks a format the receiver accepts and connects to it.
    ///
    /// With no candidates, this output's own formats are offered.
    ///
    /// # Errors
    ///
    /// Returns [`DemuxError::FormatMismatch`] if the receiver accepts none of
    /// the offered formats. An existing connection is left untouched then.
    pub fn negotiate_connection(
        &self,
        receiver: Arc<dyn InputReceiver>,
        candidates: &[MediaFormat],
    ) -> Result<Connection, DemuxError> {
        let offered = if candidates.is_empty() {
            self.formats()
        } else {
            candidates.to_vec()
        };

        let Some(format) = offered.iter().find(|format| receiver.accepts(format)).cloned() else {
            tracing::debug!(output = %self.name, receiver = receiver.name(), "no acceptable format");
            return Err(DemuxError::FormatMismatch { offered });
        };

        receiver.receive_connection(&format);
        self.connect(receiver.clone(), format.clone());

        Ok(Connection { receiver, format })
    }

    /// Stores the connection and caches the receiver's entry points.
    ///
    /// Any previous connection is released first.
    pub fn connect(&self, receiver: Arc<dyn InputReceiver>, format: MediaFormat) {
        self.disconnect();

        let entry_points = receiver.entry_points();
        if entry_points.is_none() {
            tracing::warn!(
                output = %self.name,
                receiver = receiver.name(),
                "receiver exposes no entry points, samples will not be forwarded"
            );
        }

        tracing::debug!(output = %self.name, receiver = receiver.name(), %format, "output connected");

        *self.connection.lock() = Some(Connection { receiver, format });
        self.targets.store(entry_points.map(Arc::new));
    }

    /// Releases the connection and the buffer pool handle.
    ///
    /// Safe to call when not connected.
    pub fn disconnect(&self) {
        // cached targets go first so no forward reaches a released receiver
        self.targets.store(None);

        let previous = self.connection.lock().take();
        self.pool.lock().take();

        if let Some(connection) = previous {
            tracing::debug!(
                output = %self.name,
                receiver = connection.receiver.name(),
                "output disconnected"
            );
        }
    }

    /// Relays one sample downstream; a no-op while unconnected.
    pub fn forward(&self, sample: &Sample<'_>) {
        self.samples_received.fetch_add(1, Ordering::Relaxed);

        let targets = self.targets.load();
        if let Some(targets) = &*targets {
            (targets.receive)(sample);
        }
    }

    /// Like [`forward`](Self::forward), but reports a missing connection.
    ///
    /// # Errors
    ///
    /// Returns [`DemuxError::NotConnected`] if no receiver is connected. The
    /// sample is not counted then.
    pub fn try_forward(&self, sample: &Sample<'_>) -> Result<(), DemuxError> {
        if !self.is_connected() {
            return Err(DemuxError::NotConnected);
        }
        self.forward(sample);
        Ok(())
    }

    /// Hands a shared buffer pool to the receiver; a no-op while unconnected.
    pub fn set_buffer_pool(&self, pool: &BufferPool) {
        let targets = self.targets.load();
        let Some(targets) = &*targets else {
            return;
        };

        (targets.notify_pool)(pool);
        *self.pool.lock() = Some(pool.clone());
    }

    /// Like [`set_buffer_pool`](Self::set_buffer_pool), but reports a missing
    /// connection.
    ///
    /// # Errors
    ///
    /// Returns [`DemuxError::NotConnected`] if no receiver is connected.
    pub fn try_set_buffer_pool(&self, pool: &BufferPool) -> Result<(), DemuxError> {
        if !self.is_connected() {
            return Err(DemuxError::NotConnected);
        }
        self.set_buffer_pool(pool);
        Ok(())
    }

    /// The buffer pool last handed downstream on this connection.
    pub fn buffer_pool(&self) -> Option<BufferPool> {
        self.pool.lock().clone()
    }

    /// Returns `true` while a receiver is connected.
    pub fn is_connected(&self) -> bool {
        self.connection.lock().is_some()
    }

    /// Format of the current connection.
    pub fn connected_format(&self) -> Option<MediaFormat> {
        self.connection
            .lock()
            .as_ref()
            .map(|connection| connection.format.clone())
    }

    /// Name of the connected receiver.
    pub fn connected_receiver(&self) -> Option<String> {
        self.connection
            .lock()
            .as_ref()
            .map(|connection| connection.receiver.name().to_string())
    }

    /// Samples handed to this output, connected or not.
    pub fn samples_received(&self) -> u64 {
        self.samples_received.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for OutputPin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputPin")
            .field("name", &self.name)
            .field("connection", &*self.connection.lock())
            .field("samples_received", &self.samples_received())
            .finish_non_exhaustive()
    }
}
