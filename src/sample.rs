//! Borrowed view of one media sample.

use crate::DemuxError;

/// One unit of transport stream data handed to the node by its upstream.
///
/// A `Sample` only borrows the caller's buffer for the duration of a single
/// call. Anything the node needs to keep (demultiplexing, capture) is copied
/// into owned storage before the call returns.
///
/// # Example
///
/// ```
/// use ts_demux_pin::Sample;
///
/// let buffer = [0x47u8; 376];
/// let sample = Sample::from_parts(&buffer, 188, 188).unwrap();
/// assert_eq!(sample.len(), 188);
/// ```
#[derive(Debug, Clone, Copy)]
pub struct Sample<'a> {
    data: &'a [u8],
}

impl<'a> Sample<'a> {
    /// Wraps the whole slice as a sample.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    /// Builds a sample from a buffer plus an `(offset, length)` window.
    ///
    /// # Errors
    ///
    /// Returns [`DemuxError::InvalidSample`] if the window does not lie
    /// inside the buffer.
    pub fn from_parts(buffer: &'a [u8], offset: usize, length: usize) -> Result<Self, DemuxError> {
        let end = offset.checked_add(length).ok_or_else(|| {
            DemuxError::invalid_sample(format!("offset {offset} + length {length} overflows"))
        })?;

        let data = buffer.get(offset..end).ok_or_else(|| {
            DemuxError::invalid_sample(format!(
                "window {offset}..{end} outside buffer of {} bytes",
                buffer.len()
            ))
        })?;

        Ok(Self { data })
    }

    /// The actual data of this sample.
    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    /// Actual data length in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if this sample carries no data.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Copies the payload into an independently owned buffer.
    pub fn to_owned_payload(&self) -> Vec<u8> {
        self.data.to_vec()
    }
}

impl<'a> From<&'a [u8]> for Sample<'a> {
    fn from(data: &'a [u8]) -> Self {
        Self::new(data)
    }
}
