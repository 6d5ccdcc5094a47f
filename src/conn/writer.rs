use std::collections::HashMap;
use std::fmt;
use std::io::{self, Write};

use compact_str::CompactString;
use smallvec::SmallVec;

use crate::cgi::response::{self, ReasonPhrase};
use crate::protocol as fcgi;


/// The application status reported in every `EndRequest` record.
pub const APP_STATUS: u32 = 200;


/// A writer for the response to a single FastCGI request.
///
/// Headers set via `ResponseWriter::set_header` are held back until the
/// first call to [`Write::write`], which sends them as one `Stdout` record
/// followed by the written data. Every call to [`Write::write`] frames its
/// data into its own padded `Stdout` record of at most 65535 bytes, so use
/// [`Write::write_all`] for larger payloads. Each call flushes the
/// connection's output, so a failing peer is reported by the call that
/// tried to reach it.
pub struct ResponseWriter<'a> {
    out: &'a mut dyn Write,
    reasons: &'a dyn ReasonPhrase,
    request_id: u16,
    headers: HashMap<CompactString, CompactString>,
    wrote_headers: bool,
}

impl<'a> ResponseWriter<'a> {
    /// Creates a [`ResponseWriter`] for `request_id` which frames records
    /// into `out`.
    #[must_use]
    pub fn new(out: &'a mut dyn Write, reasons: &'a dyn ReasonPhrase, request_id: u16) -> Self {
        Self { out, reasons, request_id, headers: HashMap::new(), wrote_headers: false }
    }

    /// Returns the ID of the request this writer responds to.
    #[inline]
    #[must_use]
    pub fn request_id(&self) -> u16 {
        self.request_id
    }

    /// Tests whether the header block has already been sent.
    #[inline]
    #[must_use]
    pub fn headers_written(&self) -> bool {
        self.wrote_headers
    }

    /// Sets a response header, replacing any previous value for `name`.
    ///
    /// Headers are sent with the first write. Setting a header afterwards
    /// has no effect on the response. A value spanning several lines makes
    /// that write fail with [`io::ErrorKind::InvalidInput`].
    pub fn set_header(&mut self, name: impl Into<CompactString>, value: impl Into<CompactString>) {
        let name = name.into();
        if self.wrote_headers {
            tracing::debug!(request_id = self.request_id, %name, "header set after headers were sent");
        }
        self.headers.insert(name, value.into());
    }

    /// Immediately sends the HTTP status line for `status` in its own
    /// `Stdout` record.
    ///
    /// The reason phrase comes from the [`ReasonPhrase`] lookup of the
    /// connection. Calling this twice sends two status lines.
    ///
    /// # Errors
    /// Any I/O error from the underlying connection is returned.
    pub fn start_response(&mut self, status: u16) -> io::Result<()> {
        let mut line = SmallVec::<[u8; 64]>::new();
        response::write_status_line(&mut line, status, self.reasons.reason_phrase(status))?;
        self.send(fcgi::RecordType::Stdout, &line)
    }

    /// Sends diagnostic output in the `Stderr` stream of the request.
    ///
    /// Like [`Write::write`], at most 65535 bytes are sent per call.
    ///
    /// # Errors
    /// Any I/O error from the underlying connection is returned.
    pub fn write_stderr(&mut self, data: &[u8]) -> io::Result<usize> {
        let data = &data[..data.len().min(fcgi::MAX_CONTENT_LEN)];
        self.send(fcgi::RecordType::Stderr, data)?;
        Ok(data.len())
    }

    /// Frames `data` into as many records as necessary and flushes them.
    /// Empty data sends nothing, since an empty record ends the stream.
    fn send(&mut self, rtype: fcgi::RecordType, data: &[u8]) -> io::Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        for chunk in data.chunks(fcgi::MAX_CONTENT_LEN) {
            fcgi::write_record(&mut *self.out, rtype, self.request_id, chunk)?;
        }
        self.out.flush()
    }

    fn send_headers(&mut self) -> io::Result<()> {
        let mut block = SmallVec::<[u8; 512]>::new();
        let headers = self.headers.iter().map(|(n, v)| (n.as_str(), v.as_str()));
        response::write_header_block(&mut block, headers)?;
        self.wrote_headers = true;
        crate::macros::trace!(request_id = self.request_id, len = block.len(), "headers sent");
        self.send(fcgi::RecordType::Stdout, &block)
    }

    /// Terminates the `Stdout` stream and ends the request with
    /// [`ProtocolStatus::RequestComplete`](fcgi::ProtocolStatus::RequestComplete).
    pub(crate) fn complete(self, app_status: u32) -> io::Result<()> {
        let end = fcgi::body::EndRequest {
            app_status,
            protocol_status: fcgi::ProtocolStatus::RequestComplete,
        };
        fcgi::write_record(&mut *self.out, fcgi::RecordType::Stdout, self.request_id, &[])?;
        self.out.write_all(&end.to_record(self.request_id))
    }
}

impl Write for ResponseWriter<'_> {
    /// Sends the pending headers on the first call, then frames up to 65535
    /// bytes of `buf` into a `Stdout` record.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if !self.wrote_headers {
            self.send_headers()?;
        }

        let data = &buf[..buf.len().min(fcgi::MAX_CONTENT_LEN)];
        self.send(fcgi::RecordType::Stdout, data)?;
        Ok(data.len())
    }

    #[inline]
    fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }
}

impl fmt::Debug for ResponseWriter<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ResponseWriter")
            .field("request_id", &self.request_id)
            .field("headers", &self.headers)
            .field("wrote_headers", &self.wrote_headers)
            .finish_non_exhaustive()
    }
}
