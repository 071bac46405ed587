//! Custom receiver example.
//!
//! Demonstrates how to implement the InputReceiver trait for a custom
//! downstream of the passthrough output.
//!
//! Run with: cargo run --example custom_receiver

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ts_demux_pin::{
    pool_target, sample_target, BufferPool, DemuxConfig, DemuxNode, EntryPoints, InputReceiver,
    MediaFormat, PoolProperties,
};

#[derive(Default)]
struct Stats {
    samples: AtomicU64,
    bytes: AtomicU64,
    packets: AtomicU64,
    misaligned: AtomicU64,
}

/// A custom receiver that computes packet statistics in real-time.
struct StatsReceiver {
    name: String,
    stats: Arc<Stats>,
}

impl StatsReceiver {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            stats: Arc::default(),
        }
    }

    fn report(&self) {
        println!("[{}] Final stats:", self.name);
        println!("  Samples: {}", self.stats.samples.load(Ordering::Relaxed));
        println!("  Bytes: {}", self.stats.bytes.load(Ordering::Relaxed));
        println!("  Packets: {}", self.stats.packets.load(Ordering::Relaxed));
        println!(
            "  Misaligned samples: {}",
            self.stats.misaligned.load(Ordering::Relaxed)
        );
    }
}

impl InputReceiver for StatsReceiver {
    fn name(&self) -> &str {
        &self.name
    }

    fn accepts(&self, format: &MediaFormat) -> bool {
        format.is_transport_stream()
    }

    fn receive_connection(&self, format: &MediaFormat) {
        println!("[{}] Connected with {format}", self.name);
    }

    fn entry_points(&self) -> Option<EntryPoints> {
        let stats = self.stats.clone();
        let name = self.name.clone();

        Some(EntryPoints {
            receive: sample_target(move |sample| {
                stats.samples.fetch_add(1, Ordering::Relaxed);
                stats
                    .bytes
                    .fetch_add(sample.len() as u64, Ordering::Relaxed);

                // Count packet starts; anything off the 188 byte grid is misaligned
                let data = sample.data();
                if data.len() % 188 != 0 || data.chunks(188).any(|packet| packet[0] != 0x47) {
                    stats.misaligned.fetch_add(1, Ordering::Relaxed);
                }
                stats
                    .packets
                    .fetch_add((data.len() / 188) as u64, Ordering::Relaxed);
            }),
            notify_pool: pool_target(move |pool| {
                let properties = pool.properties();
                println!(
                    "[{name}] Using buffer pool #{} ({} x {} bytes)",
                    pool.id(),
                    properties.buffer_count,
                    properties.buffer_size
                );
            }),
        })
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let receiver = Arc::new(StatsReceiver::new("ts-stats"));

    let node = DemuxNode::transport_stream(&DemuxConfig::default());
    node.connect(receiver.clone(), &MediaFormat::transport_stream())?;
    node.run();

    // Null packets, seven per sample, plus one broken sample
    let mut sample = Vec::with_capacity(7 * 188);
    for _ in 0..7 {
        let mut packet = vec![0xff; 188];
        packet[..4].copy_from_slice(&[0x47, 0x1f, 0xff, 0x10]);
        sample.extend_from_slice(&packet);
    }

    for _ in 0..100 {
        node.deliver(&sample, 0, sample.len());
    }
    node.deliver(&sample, 5, 100);

    // The upstream settles on its own pool; the receiver hears about it
    let pool = BufferPool::new(PoolProperties {
        buffer_count: 4,
        buffer_size: 7 * 188,
        alignment: 1,
        prefix: 0,
    });
    node.pin().notify_allocator(&pool, false);
    node.stop();

    receiver.report();
    Ok(())
}
