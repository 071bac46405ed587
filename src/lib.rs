//! # ts-demux-pin
//!
//! **Note:** This crate is under active development. The API may change before 1.0.
//!
//! Transport stream demultiplexing node with a passthrough output.
//!
//! `ts-demux-pin` sits between one upstream producer of MPEG transport stream
//! samples and any number of downstream consumers. It splits the stream by
//! packet identifier (PID) into per-PID consumers, forwards every sample
//! unmodified to a passthrough output, and can mirror the raw stream to a
//! capture file.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use ts_demux_pin::{
//!     unit_callback, CountingReceiver, DemuxConfig, DemuxNode, MediaFormat,
//! };
//!
//! let node = DemuxNode::transport_stream(&DemuxConfig::default());
//!
//! // Sections of the PAT (PID 0)
//! node.pin().register_consumer(0, true, unit_callback(|section| {
//!     tracing::info!(bytes = section.len(), "PAT section");
//! }));
//! node.pin().activate_consumer(0);
//!
//! // Everything also goes to the passthrough output
//! let tif = Arc::new(CountingReceiver::new("tif"));
//! node.connect(tif.clone(), &MediaFormat::transport_stream())?;
//!
//! node.run();
//! let buffer = [0x47u8, 0x1f, 0xff, 0x10];
//! node.deliver(&buffer, 0, buffer.len());
//! node.stop();
//!
//! assert_eq!(tif.samples(), 1);
//! # Ok::<(), ts_demux_pin::DemuxError>(())
//! ```
//!
//! ## Architecture
//!
//! - **[`DemuxPin`]**: upstream entry point. Feeds samples to a
//!   [`PacketProcessor`] that dispatches reassembled units to the consumer
//!   callbacks on the delivering thread, and writes the optional capture.
//! - **[`OutputPin`]**: passthrough output. Resolves the downstream
//!   receiver's entry points once per connection and calls them directly.
//! - **[`DemuxNode`]**: the Idle / Paused / Active lifecycle gating both.
//!
//! Callbacks run synchronously, so a slow consumer throttles the pipeline
//! instead of growing an unbounded queue.

#![warn(missing_docs)]
// Byte counts and packet fields move between integer widths
#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_lossless
)]
// unwrap/expect allowed in tests only
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]
// These doc lints are too strict for internal implementation details
#![allow(clippy::missing_panics_doc, clippy::must_use_candidate)]

mod capture;
mod config;
mod demux;
mod error;
mod event;
mod format;
mod forward;
mod node;
mod pool;
pub mod processor;
mod receiver;
mod sample;

pub use capture::CaptureFile;
pub use config::{DemuxConfig, DEFAULT_CAPTURE_BUFFER_SIZE, DEFAULT_SYNC_COUNT};
pub use demux::DemuxPin;
pub use error::DemuxError;
pub use event::{diagnostic_sink, tracing_diagnostics, DemuxEvent, DiagnosticSink};
pub use format::{MajorType, MediaFormat, Subtype};
pub use forward::{
    pool_target, sample_target, Connection, EntryPoints, InputReceiver, OutputPin, PoolTarget,
    SampleTarget,
};
pub use node::{DemuxNode, LifecycleState};
pub use pool::{BufferPool, PoolProperties};
pub use processor::{
    unit_callback, MockProcessor, PacketProcessor, PidStatistics, ProcessorCounters,
    TsPacketProcessor, UnitCallback,
};
pub use receiver::{channel_consumer, ChannelReceiver, CountingReceiver};
pub use sample::Sample;
