//! Double-buffered raw capture file.
//!
//! The delivering thread copies bytes into the active buffer. A full buffer
//! is handed to a writer thread and the second buffer takes its place, so
//! the delivering thread only waits on the disk when both buffers are full.

use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender, TryRecvError};

use crate::DemuxError;

/// Append-only capture of the exact bytes delivered to the pin.
///
/// No header or framing is added. An existing file at the path is truncated.
///
/// # Example
///
/// ```no_run
/// use ts_demux_pin::CaptureFile;
///
/// let mut capture = CaptureFile::create("raw.ts", 1 << 20)?;
/// capture.write(&[0x47; 188])?;
/// capture.close()?;
/// # Ok::<(), ts_demux_pin::DemuxError>(())
/// ```
pub struct CaptureFile {
    path: PathBuf,
    capacity: usize,
    active: Vec<u8>,
    spare: Vec<u8>,
    in_flight: bool,
    full_tx: Option<Sender<Vec<u8>>>,
    empty_rx: Receiver<io::Result<Vec<u8>>>,
    writer: Option<JoinHandle<()>>,
    total_bytes_written: u64,
    disk_waits: u64,
}

impl CaptureFile {
    /// Creates (or truncates) the file and starts its writer thread.
    ///
    /// `buffer_size` is the size of each of the two buffers (at least 1).
    ///
    /// # Errors
    ///
    /// Returns [`DemuxError::CaptureIo`] if the file cannot be created or the
    /// writer thread cannot be started.
    pub fn create(path: impl AsRef<Path>, buffer_size: usize) -> Result<Self, DemuxError> {
        let path = path.as_ref().to_path_buf();
        let capacity = buffer_size.max(1);

        let file = File::create(&path).map_err(|e| DemuxError::capture_io(&path, e))?;

        let (full_tx, full_rx) = crossbeam_channel::bounded::<Vec<u8>>(1);
        let (empty_tx, empty_rx) = crossbeam_channel::bounded::<io::Result<Vec<u8>>>(1);

        let writer = std::thread::Builder::new()
            .name("ts-capture".to_string())
            .spawn(move || write_loop(file, &full_rx, &empty_tx))
            .map_err(|e| DemuxError::capture_io(&path, e))?;

        tracing::debug!(path = %path.display(), buffer_size = capacity, "capture file created");

        Ok(Self {
            path,
            capacity,
            active: Vec::with_capacity(capacity),
            spare: Vec::with_capacity(capacity),
            in_flight: false,
            full_tx: Some(full_tx),
            empty_rx,
            writer: Some(writer),
            total_bytes_written: 0,
            disk_waits: 0,
        })
    }

    /// Path of the capture file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes accepted so far; some may still be buffered.
    pub fn total_bytes_written(&self) -> u64 {
        self.total_bytes_written
    }

    /// How often a write had to wait for the disk.
    pub fn disk_waits(&self) -> u64 {
        self.disk_waits
    }

    /// Appends bytes to the capture.
    ///
    /// # Errors
    ///
    /// Returns [`DemuxError::CaptureIo`] if handing a full buffer to the disk failed.
    pub fn write(&mut self, mut data: &[u8]) -> Result<(), DemuxError> {
        while !data.is_empty() {
            let copy = (self.capacity - self.active.len()).min(data.len());
            self.active.extend_from_slice(&data[..copy]);
            self.total_bytes_written += copy as u64;
            data = &data[copy..];

            if self.active.len() >= self.capacity {
                self.begin_write().map_err(|e| DemuxError::capture_io(&self.path, e))?;
            }
        }
        Ok(())
    }

    /// Writes all buffered bytes and waits for the disk.
    ///
    /// # Errors
    ///
    /// Returns [`DemuxError::CaptureIo`] if a write failed.
    pub fn flush(&mut self) -> Result<(), DemuxError> {
        self.begin_write()
            .and_then(|()| self.finish_write(false))
            .map_err(|e| DemuxError::capture_io(&self.path, e))
    }

    /// Flushes and closes the file, stopping the writer thread.
    ///
    /// # Errors
    ///
    /// Returns [`DemuxError::CaptureIo`] if the final flush failed. The file
    /// is closed either way.
    pub fn close(mut self) -> Result<(), DemuxError> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<(), DemuxError> {
        if self.full_tx.is_none() {
            return Ok(());
        }

        let result = self.flush();

        // closing the channel ends the writer loop
        self.full_tx = None;
        if let Some(writer) = self.writer.take() {
            if writer.join().is_err() {
                tracing::error!(path = %self.path.display(), "capture writer thread panicked");
            }
        }

        tracing::debug!(
            path = %self.path.display(),
            bytes = self.total_bytes_written,
            disk_waits = self.disk_waits,
            "capture file closed"
        );

        result
    }

    /// Hands the active buffer to the writer thread.
    fn begin_write(&mut self) -> io::Result<()> {
        self.finish_write(true)?;

        if self.active.is_empty() {
            return Ok(());
        }

        let Some(full_tx) = self.full_tx.as_ref() else {
            return Err(io::Error::other("capture already closed"));
        };

        let next = std::mem::take(&mut self.spare);
        let full = std::mem::replace(&mut self.active, next);
        full_tx
            .send(full)
            .map_err(|_| io::Error::other("capture writer stopped"))?;
        self.in_flight = true;
        Ok(())
    }

    /// Waits for the outstanding disk write, if any.
    fn finish_write(&mut self, more_data: bool) -> io::Result<()> {
        if !self.in_flight {
            return Ok(());
        }

        let result = match self.empty_rx.try_recv() {
            Ok(result) => result,
            Err(TryRecvError::Empty) => {
                if more_data {
                    self.disk_waits += 1;
                }
                self.empty_rx
                    .recv()
                    .map_err(|_| io::Error::other("capture writer stopped"))?
            }
            Err(TryRecvError::Disconnected) => {
                return Err(io::Error::other("capture writer stopped"));
            }
        };

        self.in_flight = false;
        self.spare = result?;
        Ok(())
    }
}

impl Drop for CaptureFile {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            tracing::warn!(error = %e, "capture flush on drop failed");
        }
    }
}

fn write_loop(mut file: File, full_rx: &Receiver<Vec<u8>>, empty_tx: &Sender<io::Result<Vec<u8>>>) {
    for mut buffer in full_rx {
        let result = file.write_all(&buffer).map(|()| {
            buffer.clear();
            buffer
        });

        if empty_tx.send(result).is_err() {
            break;
        }
    }
}
