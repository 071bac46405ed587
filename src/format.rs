//! Media format descriptors used during connection negotiation.

use std::fmt;

/// Major type of a media format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MajorType {
    /// Raw byte stream.
    Stream,
    /// Video elementary stream.
    Video,
    /// Audio elementary stream.
    Audio,
}

/// Subtype of a media format.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Subtype {
    /// MPEG-2 transport stream.
    MpegTransport,
    /// Broadcast driver architecture transport (transport stream as delivered by tuners).
    BdaTransport,
    /// Anything else, identified by name.
    Other(String),
}

/// A format descriptor agreed between two endpoints.
///
/// # Example
///
/// ```
/// use ts_demux_pin::MediaFormat;
///
/// let format = MediaFormat::transport_stream();
/// assert!(format.is_transport_stream());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MediaFormat {
    /// Major type.
    pub major: MajorType,
    /// Subtype.
    pub subtype: Subtype,
}

impl MediaFormat {
    /// Creates a format from its parts.
    pub fn new(major: MajorType, subtype: Subtype) -> Self {
        Self { major, subtype }
    }

    /// Standard MPEG-2 transport stream.
    pub fn transport_stream() -> Self {
        Self::new(MajorType::Stream, Subtype::MpegTransport)
    }

    /// Transport stream as delivered by broadcast tuner drivers.
    pub fn bda_transport() -> Self {
        Self::new(MajorType::Stream, Subtype::BdaTransport)
    }

    /// Both transport stream formats, preferred first.
    pub fn transport_formats() -> Vec<Self> {
        vec![Self::transport_stream(), Self::bda_transport()]
    }

    /// Returns `true` for either transport stream flavor.
    pub fn is_transport_stream(&self) -> bool {
        self.major == MajorType::Stream
            && matches!(self.subtype, Subtype::MpegTransport | Subtype::BdaTransport)
    }
}

impl fmt::Display for MediaFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let subtype = match &self.subtype {
            Subtype::MpegTransport => "mpeg-ts",
            Subtype::BdaTransport => "bda-ts",
            Subtype::Other(name) => name,
        };
        write!(f, "{:?}/{subtype}", self.major)
    }
}
