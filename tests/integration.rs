//! Integration tests for ts-demux-pin.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use ts_demux_pin::{
    channel_consumer, diagnostic_sink, pool_target, sample_target, unit_callback, ChannelReceiver,
    CountingReceiver, DemuxConfig, DemuxEvent, DemuxNode, DemuxPin, EntryPoints, InputReceiver,
    LifecycleState, MediaFormat, MockProcessor, PidStatistics, Sample, TsPacketProcessor,
    UnitCallback,
};

/// A test receiver that records every forwarded sample.
#[derive(Default)]
struct RecordingReceiver {
    samples: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl RecordingReceiver {
    fn samples(&self) -> Vec<Vec<u8>> {
        self.samples.lock().unwrap().clone()
    }
}

impl InputReceiver for RecordingReceiver {
    fn name(&self) -> &str {
        "recording"
    }

    fn accepts(&self, format: &MediaFormat) -> bool {
        format.is_transport_stream()
    }

    fn entry_points(&self) -> Option<EntryPoints> {
        let samples = self.samples.clone();
        Some(EntryPoints {
            receive: sample_target(move |sample| {
                samples.lock().unwrap().push(sample.to_owned_payload());
            }),
            notify_pool: pool_target(|_| {}),
        })
    }
}

fn recording_consumer() -> (UnitCallback, Arc<Mutex<Vec<usize>>>) {
    let sizes = Arc::new(Mutex::new(Vec::new()));
    let sizes_clone = sizes.clone();
    let callback = unit_callback(move |unit| sizes_clone.lock().unwrap().push(unit.len()));
    (callback, sizes)
}

/// One transport stream packet carrying a complete PES unit.
fn pes_packet(pid: u16, counter: u8, body_len: usize) -> Vec<u8> {
    let mut packet = vec![0xff; 188];
    packet[0] = 0x47;
    packet[1] = 0x40 | ((pid >> 8) as u8 & 0x1f);
    packet[2] = pid as u8;
    packet[3] = 0x10 | (counter & 0x0f);
    packet[4..8].copy_from_slice(&[0, 0, 1, 0xe0]);
    packet[8..10].copy_from_slice(&(body_len as u16).to_be_bytes());
    packet
}

#[test]
fn test_three_payloads_reach_consumer_with_statistics() {
    let node = DemuxNode::new(MockProcessor::new());
    let (callback, sizes) = recording_consumer();

    node.pin().register_consumer(100, false, callback);
    node.pin().activate_consumer(100);
    node.run();

    for size in [10, 20, 30] {
        let buffer = vec![0u8; size];
        assert_eq!(node.deliver(&buffer, 0, size), 0);
    }

    assert_eq!(*sizes.lock().unwrap(), vec![10, 20, 30]);
    assert_eq!(
        node.pin().statistics(100),
        PidStatistics {
            min_size: 10,
            max_size: 30,
            count: 3,
            total_bytes: 60,
        }
    );
}

#[test]
fn test_capture_contains_exactly_delivered_bytes() {
    use tempfile::tempdir;

    let dir = tempdir().unwrap();
    let path = dir.path().join("capture.ts");

    let node = DemuxNode::new(MockProcessor::new());
    node.run();
    node.pin().start_capture(&path).unwrap();

    let buffer = [1u8, 2, 3, 4, 5];
    assert_eq!(node.deliver(&buffer, 0, 5), 0);
    node.pin().stop_capture();

    assert_eq!(std::fs::read(&path).unwrap(), vec![1, 2, 3, 4, 5]);

    // idempotent, also without an active capture
    node.pin().stop_capture();
    node.pin().stop_capture();
    assert_eq!(std::fs::read(&path).unwrap(), vec![1, 2, 3, 4, 5]);
}

#[test]
fn test_idle_delivery_is_silent() {
    let node = DemuxNode::new(MockProcessor::new());
    let (callback, sizes) = recording_consumer();
    node.pin().register_consumer(100, false, callback);
    node.pin().activate_consumer(100);

    assert_eq!(node.current_state(), LifecycleState::Idle);
    assert_eq!(node.deliver(&[0u8; 10], 0, 10), 0);

    assert!(sizes.lock().unwrap().is_empty());
}

#[test]
fn test_forward_after_disconnect_is_noop() {
    let node = DemuxNode::new(MockProcessor::new());
    let receiver = Arc::new(RecordingReceiver::default());
    node.connect(receiver.clone(), &MediaFormat::transport_stream())
        .unwrap();
    node.run();

    node.deliver(&[1], 0, 1);
    node.deliver(&[2], 0, 1);
    node.disconnect();
    assert_eq!(node.deliver(&[3], 0, 1), 0);

    assert_eq!(receiver.samples(), vec![vec![1], vec![2]]);
}

#[test]
fn test_every_active_sample_forwarded_once() {
    let node = DemuxNode::new(MockProcessor::new());
    let receiver = Arc::new(CountingReceiver::new("tif"));
    node.connect(receiver.clone(), &MediaFormat::transport_stream())
        .unwrap();

    // no consumer at all, and one empty sample
    node.run();
    for length in [188, 0, 376] {
        let buffer = vec![0x47; length];
        node.deliver(&buffer, 0, length);
    }

    assert_eq!(receiver.samples(), 3);
    assert_eq!(receiver.bytes(), 564);
    assert_eq!(node.pin().dropped_samples(), 1);
}

#[test]
fn test_dispatch_only_between_activate_and_deactivate() {
    let node = DemuxNode::new(MockProcessor::new());
    let (callback, sizes) = recording_consumer();
    node.pin().register_consumer(7, true, callback);
    node.run();

    node.deliver(&[0; 1], 0, 1);
    node.pin().activate_consumer(7);
    node.deliver(&[0; 2], 0, 2);
    node.pin().deactivate_consumer(7);
    node.deliver(&[0; 3], 0, 3);
    node.pin().activate_consumer(7);
    node.deliver(&[0; 4], 0, 4);
    node.pause();
    node.deliver(&[0; 5], 0, 5);

    assert_eq!(*sizes.lock().unwrap(), vec![2, 4]);
}

#[test]
fn test_consumers_must_be_registered_again_after_stop() {
    let node = DemuxNode::new(MockProcessor::new());
    let (callback, sizes) = recording_consumer();
    node.pin().register_consumer(100, false, callback.clone());
    node.pin().activate_consumer(100);
    node.run();
    node.stop();

    node.pin().activate_consumer(100);
    node.run();
    node.deliver(&[0; 8], 0, 8);
    assert!(sizes.lock().unwrap().is_empty());

    node.pin().register_consumer(100, false, callback);
    node.pin().activate_consumer(100);
    node.deliver(&[0; 8], 0, 8);
    assert_eq!(*sizes.lock().unwrap(), vec![8]);
}

#[test]
fn test_statistics_summaries_on_stop() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let events_clone = events.clone();
    let config = DemuxConfig {
        statistics: true,
        ..Default::default()
    };
    let pin = DemuxPin::with_config(MockProcessor::new(), &config).with_diagnostics(
        diagnostic_sink(move |event| events_clone.lock().unwrap().push(event.to_string())),
    );
    let node = DemuxNode::from_pin(pin);

    node.pin().register_consumer(100, false, unit_callback(|_| {}));
    node.pin().activate_consumer(100);
    node.run();
    for size in [10, 20, 30] {
        node.deliver(&vec![0u8; size], 0, size);
    }
    node.pause();

    let events = events.lock().unwrap();
    assert_eq!(
        *events,
        vec![
            "cb=3 b=60 s=0 p=3 enc=0 strm=0 tbl=0 sync=0 err=0 out=3".to_string(),
            "[00100] #3 60 ([10..30] 20)".to_string(),
            "00100 #3".to_string(),
        ]
    );
}

#[test]
fn test_transport_stream_node_end_to_end() {
    let config = DemuxConfig {
        sync_count: 2,
        ..Default::default()
    };
    let node = DemuxNode::transport_stream(&config);
    let (video, video_sizes) = recording_consumer();
    let (audio, audio_sizes) = recording_consumer();
    node.pin().register_consumer(0x100, false, video);
    node.pin().register_consumer(0x101, false, audio);
    node.pin().activate_consumer(0x100);
    node.pin().activate_consumer(0x101);
    node.run();

    let stream = [
        pes_packet(0x100, 0, 20),
        pes_packet(0x101, 0, 10),
        pes_packet(0x100, 1, 30),
        pes_packet(0x102, 0, 10),
    ]
    .concat();

    // odd split across two deliveries
    node.deliver(&stream, 0, 300);
    node.deliver(&stream, 300, stream.len() - 300);

    assert_eq!(*video_sizes.lock().unwrap(), vec![26, 36]);
    assert_eq!(*audio_sizes.lock().unwrap(), vec![16]);

    let counters = node.pin().counters();
    assert_eq!(counters.packets_received, 4);
    assert_eq!(counters.bytes_received, 752);
    assert_eq!(counters.bytes_skipped, 0);
}

#[test]
fn test_ts_processor_pin_reports_scrambled() {
    let pin = DemuxPin::new(TsPacketProcessor::with_sync_count(1));
    pin.start();

    let mut packet = pes_packet(0x100, 0, 10);
    packet[3] |= 0xc0;
    pin.deliver(&Sample::new(&packet)).unwrap();

    assert_eq!(pin.counters().scrambled, 1);
}

#[tokio::test]
async fn test_channel_bridges() {
    let (unit_tx, mut unit_rx) = mpsc::channel::<Vec<u8>>(16);
    let (sample_tx, mut sample_rx) = mpsc::channel::<Vec<u8>>(16);

    let node = DemuxNode::new(MockProcessor::new());
    node.pin().register_consumer(0x12, true, channel_consumer(unit_tx));
    node.pin().activate_consumer(0x12);
    node.connect(
        Arc::new(ChannelReceiver::new(sample_tx)),
        &MediaFormat::bda_transport(),
    )
    .unwrap();
    node.run();

    node.deliver(&[9, 8, 7, 6], 1, 2);

    assert_eq!(unit_rx.recv().await.unwrap(), vec![8, 7]);
    assert_eq!(sample_rx.recv().await.unwrap(), vec![8, 7]);
}

#[cfg(target_os = "linux")]
#[test]
fn test_capture_failure_keeps_node_running() {
    let failures = Arc::new(AtomicUsize::new(0));
    let failures_clone = failures.clone();
    let config = DemuxConfig {
        capture_buffer_size: 1,
        ..Default::default()
    };
    let pin = DemuxPin::with_config(MockProcessor::new(), &config).with_diagnostics(
        diagnostic_sink(move |event| {
            if matches!(event, DemuxEvent::CaptureFailed { .. }) {
                failures_clone.fetch_add(1, Ordering::SeqCst);
            }
        }),
    );
    let node = DemuxNode::from_pin(pin);
    let (callback, sizes) = recording_consumer();
    node.pin().register_consumer(100, false, callback);
    node.pin().activate_consumer(100);
    let receiver = Arc::new(RecordingReceiver::default());
    node.connect(receiver.clone(), &MediaFormat::transport_stream())
        .unwrap();
    node.run();

    // writes to /dev/full always fail
    node.pin().start_capture("/dev/full").unwrap();
    assert_eq!(node.deliver(&[1, 2, 3], 0, 3), 0);

    assert_eq!(failures.load(Ordering::SeqCst), 1);
    assert!(!node.pin().is_capturing());

    assert_eq!(node.deliver(&[4, 5], 0, 2), 0);

    assert_eq!(failures.load(Ordering::SeqCst), 1);
    assert_eq!(*sizes.lock().unwrap(), vec![3, 2]);
    assert_eq!(receiver.samples(), vec![vec![1, 2, 3], vec![4, 5]]);
    assert_eq!(node.current_state(), LifecycleState::Active);
}

#[test]
fn test_one_shot_table_consumer() {
    let node = Arc::new(DemuxNode::new(MockProcessor::new()));
    let sections = Arc::new(AtomicUsize::new(0));

    let weak = Arc::downgrade(&node);
    let sections_clone = sections.clone();
    node.pin().register_consumer(
        0,
        true,
        unit_callback(move |_| {
            sections_clone.fetch_add(1, Ordering::SeqCst);
            if let Some(node) = weak.upgrade() {
                node.pin().unregister_consumer(0);
            }
        }),
    );
    node.pin().activate_consumer(0);
    node.run();

    for _ in 0..3 {
        assert_eq!(node.deliver(&[0; 12], 0, 12), 0);
    }

    assert_eq!(sections.load(Ordering::SeqCst), 1);
    assert!(!node.pin().is_registered(0));
    assert!(!node.pin().is_active(0));
}
