//! Configuration for the demultiplexing node.

/// Size of each of the two capture buffers (10 MB).
pub const DEFAULT_CAPTURE_BUFFER_SIZE: usize = 10_000_000;

/// Consecutive sync bytes required before the processor trusts a packet grid.
pub const DEFAULT_SYNC_COUNT: usize = 5;

/// Configuration for a [`DemuxNode`](crate::DemuxNode).
///
/// Use [`DemuxConfig::default()`] for sensible defaults, or customize as needed.
///
/// # Example
///
/// ```
/// use ts_demux_pin::DemuxConfig;
///
/// let config = DemuxConfig {
///     statistics: true,
///     ..Default::default()
/// };
/// assert_eq!(config.output_name, "TIF");
/// ```
#[derive(Debug, Clone)]
pub struct DemuxConfig {
    /// Collect per-PID statistics and emit summaries on stop/deactivate.
    ///
    /// Default: false
    pub statistics: bool,

    /// Size in bytes of each half of the double-buffered capture file.
    ///
    /// Default: 10 MB
    pub capture_buffer_size: usize,

    /// Number of sync bytes spaced one packet apart that must be found
    /// before the transport stream processor locks onto the stream.
    ///
    /// Default: 5
    pub sync_count: usize,

    /// Name of the passthrough output endpoint.
    ///
    /// Default: "TIF"
    pub output_name: String,
}

impl Default for DemuxConfig {
    fn default() -> Self {
        Self {
            statistics: false,
            capture_buffer_size: DEFAULT_CAPTURE_BUFFER_SIZE,
            sync_count: DEFAULT_SYNC_COUNT,
            output_name: "TIF".to_string(),
        }
    }
}
