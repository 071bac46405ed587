//! Ready-made downstream receivers and consumer callbacks.
//!
//! - [`ChannelReceiver`]: passthrough samples into a tokio mpsc channel
//! - [`CountingReceiver`]: counts samples and bytes, for tests and monitoring
//! - [`channel_consumer`]: demultiplexed units into a tokio mpsc channel
//!
//! The delivering thread is never blocked on a channel. When a channel is
//! full the data is dropped and counted.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::forward::{pool_target, sample_target};
use crate::processor::{unit_callback, UnitCallback};
use crate::{EntryPoints, InputReceiver, MediaFormat};

/// A receiver that sends forwarded samples to a tokio mpsc channel.
///
/// Each sample is copied into a `Vec<u8>`. Sending uses `try_send`; samples
/// that do not fit are dropped and counted in [`dropped`](Self::dropped).
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use tokio::sync::mpsc;
/// use ts_demux_pin::{ChannelReceiver, MediaFormat, OutputPin, Sample};
///
/// let (tx, mut rx) = mpsc::channel::<Vec<u8>>(100);
/// let receiver = Arc::new(ChannelReceiver::new(tx));
///
/// let output = OutputPin::new("TIF");
/// output.connect(receiver, MediaFormat::transport_stream());
/// output.forward(&Sample::new(&[0x47; 188]));
///
/// assert_eq!(rx.try_recv().unwrap().len(), 188);
/// ```
pub struct ChannelReceiver {
    name: String,
    sender: mpsc::Sender<Vec<u8>>,
    dropped: Arc<AtomicU64>,
}

impl ChannelReceiver {
    /// Creates a new channel receiver with the given sender.
    ///
    /// Size the channel for bursts; a capacity of a few hundred samples is
    /// usually enough.
    pub fn new(sender: mpsc::Sender<Vec<u8>>) -> Self {
        Self::with_name("channel", sender)
    }

    /// Creates a new channel receiver with a custom name.
    pub fn with_name(name: impl Into<String>, sender: mpsc::Sender<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            sender,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Samples dropped because the channel was full or closed.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl InputReceiver for ChannelReceiver {
    fn name(&self) -> &str {
        &self.name
    }

    fn accepts(&self, format: &MediaFormat) -> bool {
        format.is_transport_stream()
    }

    fn entry_points(&self) -> Option<EntryPoints> {
        let sender = self.sender.clone();
        let dropped = self.dropped.clone();

        Some(EntryPoints {
            receive: sample_target(move |sample| {
                if sender.try_send(sample.to_owned_payload()).is_err() {
                    dropped.fetch_add(1, Ordering::Relaxed);
                }
            }),
            notify_pool: pool_target(|_| {}),
        })
    }
}

#[derive(Debug, Default)]
struct Counts {
    samples: AtomicU64,
    bytes: AtomicU64,
    pool_changes: AtomicU64,
}

/// A receiver that only counts what reaches it.
#[derive(Debug)]
pub struct CountingReceiver {
    name: String,
    counts: Arc<Counts>,
}

impl CountingReceiver {
    /// Creates a counting receiver with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            counts: Arc::default(),
        }
    }

    /// Samples received.
    pub fn samples(&self) -> u64 {
        self.counts.samples.load(Ordering::SeqCst)
    }

    /// Bytes received.
    pub fn bytes(&self) -> u64 {
        self.counts.bytes.load(Ordering::SeqCst)
    }

    /// Buffer pool notifications received.
    pub fn pool_changes(&self) -> u64 {
        self.counts.pool_changes.load(Ordering::SeqCst)
    }
}

impl InputReceiver for CountingReceiver {
    fn name(&self) -> &str {
        &self.name
    }

    fn accepts(&self, format: &MediaFormat) -> bool {
        format.is_transport_stream()
    }

    fn entry_points(&self) -> Option<EntryPoints> {
        let counts = self.counts.clone();
        let pool_counts = self.counts.clone();

        Some(EntryPoints {
            receive: sample_target(move |sample| {
                counts.samples.fetch_add(1, Ordering::SeqCst);
                counts.bytes.fetch_add(sample.len() as u64, Ordering::SeqCst);
            }),
            notify_pool: pool_target(move |_| {
                pool_counts.pool_changes.fetch_add(1, Ordering::SeqCst);
            }),
        })
    }
}

/// A consumer callback that sends each demultiplexed unit to a channel.
///
/// Units that do not fit into the channel are dropped.
///
/// # Example
///
/// ```
/// use tokio::sync::mpsc;
/// use ts_demux_pin::{channel_consumer, DemuxPin, MockProcessor, Sample};
///
/// let (tx, mut rx) = mpsc::channel::<Vec<u8>>(16);
///
/// let pin = DemuxPin::new(MockProcessor::new());
/// pin.register_consumer(0x12, true, channel_consumer(tx));
/// pin.activate_consumer(0x12);
/// pin.start();
/// pin.deliver(&Sample::new(&[1, 2, 3])).unwrap();
///
/// assert_eq!(rx.try_recv().unwrap(), vec![1, 2, 3]);
/// ```
pub fn channel_consumer(sender: mpsc::Sender<Vec<u8>>) -> UnitCallback {
    unit_callback(move |unit| {
        if let Err(mpsc::error::TrySendError::Full(_)) = sender.try_send(unit.to_vec()) {
            tracing::trace!(bytes = unit.len(), "consumer channel full, unit dropped");
        }
    })
}
