//! Split a transport stream file by PID.
//!
//! Reads a recorded transport stream, feeds it to a demultiplexing node in
//! sample-sized pieces and writes every requested PID's units to its own
//! file. Optionally mirrors the raw input to a capture file.
//!
//! Run with: cargo run --example split_file -- input.ts 0x100 0x101 [--capture raw.ts]
//!
//! Set `RUST_LOG=ts_demux_pin=debug` for details; statistics are always printed.

use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::sync::{Arc, Mutex};

use tracing_subscriber::EnvFilter;
use ts_demux_pin::{
    tracing_diagnostics, unit_callback, CountingReceiver, DemuxConfig, DemuxNode, DemuxPin,
    MediaFormat, TsPacketProcessor,
};

/// Bytes per delivered sample, as a tuner driver would hand them out.
const SAMPLE_SIZE: usize = 188 * 348;

fn parse_pid(arg: &str) -> Result<u16, std::num::ParseIntError> {
    match arg.strip_prefix("0x") {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => arg.parse(),
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let Some(input) = args.next() else {
        eprintln!("usage: split_file <input.ts> <pid>... [--capture <raw.ts>]");
        std::process::exit(2);
    };

    let mut pids = Vec::new();
    let mut capture = None;
    while let Some(arg) = args.next() {
        if arg == "--capture" {
            capture = args.next();
        } else {
            pids.push(parse_pid(&arg)?);
        }
    }

    let config = DemuxConfig {
        statistics: true,
        ..Default::default()
    };
    let pin = DemuxPin::with_config(TsPacketProcessor::with_sync_count(config.sync_count), &config)
        .with_diagnostics(tracing_diagnostics());
    let node = DemuxNode::from_pin(pin);

    for &pid in &pids {
        let out = Arc::new(Mutex::new(BufWriter::new(File::create(format!(
            "{input}.{pid:05}"
        ))?)));

        // PID 0 and anything below 0x20 carry tables
        let is_control_data = pid < 0x20;
        node.pin().register_consumer(
            pid,
            is_control_data,
            unit_callback(move |unit| {
                if let Ok(mut out) = out.lock() {
                    if let Err(e) = out.write_all(unit) {
                        tracing::error!(pid, error = %e, "write failed");
                    }
                }
            }),
        );
        node.pin().activate_consumer(pid);
    }

    let passthrough = Arc::new(CountingReceiver::new("tif"));
    node.connect(passthrough.clone(), &MediaFormat::transport_stream())?;

    if let Some(path) = &capture {
        node.pin().start_capture(path)?;
    }

    node.run();

    let mut file = File::open(&input)?;
    let mut buffer = vec![0u8; SAMPLE_SIZE];
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        let status = node.deliver(&buffer, 0, read);
        if status < 0 {
            tracing::error!(status, "delivery failed");
            break;
        }
    }

    node.pin().stop_capture();
    // stop() emits the statistics and drops the consumers, which flushes
    // their writers
    node.stop();

    println!(
        "{} samples ({} bytes) passed through",
        passthrough.samples(),
        passthrough.bytes()
    );

    Ok(())
}
