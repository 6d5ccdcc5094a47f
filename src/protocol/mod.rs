/// Types representing the bodies of fixed-size FastCGI records.
pub mod body;
mod fields;
/// An encoder and decoder for FastCGI name-value pairs.
pub mod nv;
/// An encoder and decoder for FastCGI's variable-length integers.
pub mod varint;
mod record;

pub use fields::*;
pub use record::*;


/// The fixed FastCGI request ID for management records.
pub const FCGI_NULL_REQUEST_ID: u16 = 0;

/// The largest payload a single FastCGI record can carry.
pub const MAX_CONTENT_LEN: usize = u16::MAX as usize;


/// Error types that may occur while processing FastCGI protocol elements.
#[derive(Debug, Clone, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The FastCGI version field specifies an unknown version identifier.
    #[error("unknown FastCGI protocol version {0}")]
    UnknownVersion(u8),
    /// The FastCGI record type field specifies an unknown record type.
    #[error("unknown FastCGI record type {0}")]
    UnknownRecordType(u8),
    /// The FastCGI request role field specifies an unknown role identifier.
    #[error("unknown FastCGI role {0}")]
    UnknownRole(u16),
    /// The FastCGI request flags contain at least one unknown flag bit.
    #[error("unknown FastCGI request flags {0:#010b}")]
    UnknownFlags(u8),
    /// The FastCGI response protocol status specifies an unknown status.
    #[error("unknown FastCGI protocol status {0}")]
    UnknownStatus(u8),

    /// A name-value pair in a `Params` record runs past the end of the record.
    #[error("malformed FastCGI name-value pair at offset {offset} of {len} bytes")]
    MalformedParams {
        /// The offset of the first undecodable byte.
        offset: usize,
        /// The length of the record content.
        len: usize,
    },
    /// A record payload exceeds the 16-bit FastCGI content length field.
    #[error("content of {0} bytes does not fit into a single FastCGI record")]
    ContentTooLarge(usize),
    /// The input value is too large to be encoded as a FastCGI VarInt.
    #[error("input is too large to be encoded as a FastCGI VarInt")]
    InvalidVarInt,
    /// An I/O error occurred while encoding into a writer.
    #[error("I/O error while encoding: {0}")]
    Io(std::io::ErrorKind),
}

impl From<std::io::Error> for Error {
    #[inline]
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.kind())
    }
}


/// A FastCGI record header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordHeader {
    /// The FastCGI version of this record.
    pub version: Version,
    /// The type of this record, defining its payload.
    pub rtype: RecordType,
    /// The ID of the request this record belongs to.
    pub request_id: u16,
    /// The length of this record's payload.
    pub content_length: u16,
    /// The amount of padding following this record.
    pub padding_length: u8,
}

impl RecordHeader {
    /// Creates a new [`RecordHeader`] with [`Version::V1`] and all
    /// lengths set to 0.
    #[inline]
    #[must_use]
    pub fn new(rtype: RecordType, request_id: u16) -> Self {
        Self { version: Version::V1, rtype, request_id, content_length: 0, padding_length: 0 }
    }

    /// Sets `content_length` and the matching `padding_length`.
    ///
    /// Up to 7 bytes of padding are used such that
    /// `content_length + padding_length` is a multiple of 8.
    #[inline]
    pub fn set_lengths(&mut self, content_length: u16) {
        self.content_length = content_length;
        self.padding_length = padding_for(content_length.into());
    }

    /// Tests whether this [`RecordHeader`] represents a management record.
    #[inline]
    #[must_use]
    pub fn is_management(self) -> bool {
        self.rtype.is_management() && self.request_id == FCGI_NULL_REQUEST_ID
    }

    /// Returns a slice of `self.padding_length` zero bytes to be used as padding.
    #[inline]
    #[must_use]
    pub fn padding_bytes(self) -> &'static [u8] {
        static PADDING: [u8; u8::MAX as usize] = [0; u8::MAX as usize];
        &PADDING[..self.padding_length.into()]
    }

    /// The number of payload and padding bytes following this header.
    #[inline]
    #[must_use]
    pub fn body_len(self) -> usize {
        usize::from(self.content_length) + usize::from(self.padding_length)
    }

    /// The number of bytes in the wire format of a [`RecordHeader`].
    pub const LEN: usize = 8;

    /// Parses the input bytes into a FastCGI [`RecordHeader`].
    ///
    /// # Errors
    /// Returns an error if any of the header components are invalid.
    pub fn from_bytes(data: [u8; Self::LEN]) -> Result<Self, Error> {
        Ok(Self {
            version: Version::try_from(data[0])?,
            rtype: RecordType::try_from(data[1])?,
            request_id: u16::from_be_bytes([data[2], data[3]]),
            content_length: u16::from_be_bytes([data[4], data[5]]),
            padding_length: data[6],
        })
    }

    /// Encodes the [`RecordHeader`] into its binary wire format.
    #[inline]
    #[must_use]
    pub fn to_bytes(self) -> [u8; Self::LEN] {
        let mut buf = [0; Self::LEN];
        buf[0] = self.version.into();
        buf[1] = self.rtype.into();
        buf[2..4].copy_from_slice(&self.request_id.to_be_bytes());
        buf[4..6].copy_from_slice(&self.content_length.to_be_bytes());
        buf[6] = self.padding_length;
        buf
    }
}

/// Computes the number of zero bytes needed to align `content_length` to
/// the next multiple of 8.
#[inline]
#[must_use]
pub fn padding_for(content_length: usize) -> u8 {
    // The result is always in 0..8
    #[allow(clippy::cast_possible_truncation)]
    let padding = (8 - content_length % 8) % 8;
    padding as u8
}
