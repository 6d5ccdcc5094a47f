use std::io::{self, prelude::*};

use super::{Error, RecordHeader, RecordType, MAX_CONTENT_LEN};


/// Errors from reading FastCGI records off a byte stream.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ReadError {
    /// The peer closed the stream at a record boundary.
    ///
    /// This is the regular end of a connection, not a failure.
    #[error("FastCGI peer closed the connection")]
    StreamClosed,
    /// The stream ended in the middle of a record header.
    #[error("FastCGI record header truncated after {0} of 8 bytes")]
    TruncatedHeader(usize),
    /// The stream ended in the middle of a record's payload or padding.
    #[error("FastCGI record body truncated after {read} of {expected} bytes")]
    TruncatedBody {
        /// The number of payload and padding bytes announced by the header.
        expected: usize,
        /// The number of bytes received before the stream ended.
        read: usize,
    },
    /// A record of an unknown type was received. Its body has already been
    /// skipped, so reading may continue with the next record.
    #[error("FastCGI record of unknown type {rtype} for request {request_id}")]
    UnknownType {
        /// The raw type field of the record.
        rtype: u8,
        /// The request ID field of the record.
        request_id: u16,
    },
    /// The header could not be parsed, so the stream cannot be resynchronized.
    #[error("invalid FastCGI record header: {0}")]
    Protocol(#[from] Error),
    /// The underlying stream failed.
    #[error("I/O error while reading FastCGI records: {0}")]
    Io(#[from] io::Error),
}

impl ReadError {
    /// Tests whether reading may continue after this error.
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::UnknownType { .. })
    }
}


/// A complete FastCGI record as read from the wire, without its padding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// The record's header. Its lengths describe the record on the wire.
    pub header: RecordHeader,
    /// The record's payload.
    pub content: Vec<u8>,
}

impl Record {
    /// Creates a [`Record`] with a header matching `content`.
    ///
    /// # Errors
    /// Returns [`Error::ContentTooLarge`] if `content` exceeds
    /// [`MAX_CONTENT_LEN`].
    pub fn new(rtype: RecordType, request_id: u16, content: Vec<u8>) -> Result<Self, Error> {
        let mut header = RecordHeader::new(rtype, request_id);
        header.set_lengths(content_len(&content)?);
        Ok(Self { header, content })
    }

    /// The type of this record.
    #[inline]
    #[must_use]
    pub fn rtype(&self) -> RecordType {
        self.header.rtype
    }

    /// The ID of the request this record belongs to.
    #[inline]
    #[must_use]
    pub fn request_id(&self) -> u16 {
        self.header.request_id
    }

    /// Encodes the record into its wire format, including padding.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(RecordHeader::LEN + self.header.body_len());
        buf.extend(self.header.to_bytes());
        buf.extend(&self.content);
        buf.extend(self.header.padding_bytes());
        buf
    }
}


#[inline]
fn content_len(content: &[u8]) -> Result<u16, Error> {
    u16::try_from(content.len()).map_err(|_| Error::ContentTooLarge(content.len()))
}

/// Encodes a single padded record with the given payload.
///
/// # Errors
/// Returns [`Error::ContentTooLarge`] if `content` exceeds [`MAX_CONTENT_LEN`].
pub fn encode(rtype: RecordType, request_id: u16, content: &[u8]) -> Result<Vec<u8>, Error> {
    let mut head = RecordHeader::new(rtype, request_id);
    head.set_lengths(content_len(content)?);

    let mut buf = Vec::with_capacity(RecordHeader::LEN + head.body_len());
    buf.extend(head.to_bytes());
    buf.extend(content);
    buf.extend(head.padding_bytes());
    Ok(buf)
}

/// Writes a single padded record with the given payload into `w`.
///
/// The payload must not exceed [`MAX_CONTENT_LEN`] bytes. This is verified by
/// an assertion, callers are expected to split larger payloads.
///
/// # Errors
/// Any errors from [`Write::write_all`] are forwarded to the caller.
pub fn write_record<W>(w: &mut W, rtype: RecordType, request_id: u16, content: &[u8]) -> io::Result<()>
where
    W: Write + ?Sized,
{
    assert!(content.len() <= MAX_CONTENT_LEN, "record content exceeds {MAX_CONTENT_LEN} bytes");
    let mut head = RecordHeader::new(rtype, request_id);
    #[allow(clippy::cast_possible_truncation)]
    head.set_lengths(content.len() as u16);

    w.write_all(&head.to_bytes())?;
    w.write_all(content)?;
    w.write_all(head.padding_bytes())
}


/// Reads into `buf` until it is full or the stream ends, returning the
/// number of bytes read.
fn read_full<R: Read + ?Sized>(r: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut read = 0;
    while read < buf.len() {
        match r.read(&mut buf[read..]) {
            Ok(0) => break,
            Ok(n) => read += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {},
            Err(e) => return Err(e),
        }
    }
    Ok(read)
}

/// Reads the raw bytes of the next record header.
fn read_head<R: Read + ?Sized>(r: &mut R) -> Result<[u8; RecordHeader::LEN], ReadError> {
    let mut head = [0; RecordHeader::LEN];
    match read_full(r, &mut head)? {
        0 => Err(ReadError::StreamClosed),
        RecordHeader::LEN => Ok(head),
        n => Err(ReadError::TruncatedHeader(n)),
    }
}

/// Reads and discards exactly `len` bytes.
fn skip<R: Read + ?Sized>(r: &mut R, len: usize, expected: usize) -> Result<(), ReadError> {
    let mut scratch = [0; 256];
    let mut rem = len;
    while rem > 0 {
        let chunk = rem.min(scratch.len());
        let n = read_full(r, &mut scratch[..chunk])?;
        rem -= n;
        if n < chunk {
            return Err(ReadError::TruncatedBody { expected, read: expected - rem });
        }
    }
    Ok(())
}

/// Reads the next record header from the stream.
///
/// # Errors
/// Returns [`ReadError::StreamClosed`] if the stream ended before the first
/// header byte and [`ReadError::TruncatedHeader`] if it ended within the
/// header. Invalid header fields result in [`ReadError::Protocol`].
pub fn read_header<R: Read + ?Sized>(r: &mut R) -> Result<RecordHeader, ReadError> {
    Ok(RecordHeader::from_bytes(read_head(r)?)?)
}

/// Reads the payload described by `head` and discards its padding.
///
/// # Errors
/// Returns [`ReadError::TruncatedBody`] if the stream ends early.
pub fn read_body<R: Read + ?Sized>(r: &mut R, head: RecordHeader) -> Result<Vec<u8>, ReadError> {
    let expected = head.body_len();
    let mut content = vec![0; head.content_length.into()];
    let read = read_full(r, &mut content)?;
    if read < content.len() {
        return Err(ReadError::TruncatedBody { expected, read });
    }
    skip(r, head.padding_length.into(), expected)?;
    Ok(content)
}

/// Reads the next complete record from the stream.
///
/// Records with an unknown type are skipped entirely and reported as
/// [`ReadError::UnknownType`], after which the stream is positioned at the
/// next record.
///
/// # Errors
/// See [`read_header`] and [`read_body`].
pub fn read_record<R: Read + ?Sized>(r: &mut R) -> Result<Record, ReadError> {
    let raw = read_head(r)?;
    let header = match RecordHeader::from_bytes(raw) {
        Ok(h) => h,
        Err(Error::UnknownRecordType(rtype)) => {
            let request_id = u16::from_be_bytes([raw[2], raw[3]]);
            let body_len = usize::from(u16::from_be_bytes([raw[4], raw[5]])) + usize::from(raw[6]);
            skip(r, body_len, body_len)?;
            return Err(ReadError::UnknownType { rtype, request_id });
        },
        Err(e) => return Err(e.into()),
    };

    let content = read_body(r, header)?;
    Ok(Record { header, content })
}
