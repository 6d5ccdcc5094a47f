use std::io::{self, BufReader, BufWriter, Read, Write};

use tracing::{debug, info};

use crate::cgi::{response::ReasonPhrase, Request};
use crate::macros::trace;
use crate::protocol::{self as fcgi, ReadError};
use crate::Config;

mod cancel;
mod session;
mod writer;
#[cfg(test)]
pub(crate) mod test_support;

pub use cancel::CancelToken;
pub use session::{Phase, Session};
pub use writer::{ResponseWriter, APP_STATUS};


/// Errors that end the processing of a FastCGI connection.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The record stream could not be read.
    #[error(transparent)]
    Read(#[from] ReadError),
    /// A `Params` record could not be decoded.
    #[error("invalid FastCGI Params record: {0}")]
    Params(fcgi::Error),
    /// Writing a reply or response into the connection failed.
    #[error("failed to write to FastCGI connection: {0}")]
    WriteFailure(#[source] io::Error),
    /// The connection's [`CancelToken`] was cancelled.
    #[error("FastCGI connection was cancelled")]
    Cancelled,
}


/// An application that responds to requests.
///
/// The handler is invoked exactly once per request, after its `Stdin` stream
/// has ended. The response is complete when the handler returns. Closures of
/// the matching signature implement this trait.
pub trait Handler {
    /// Responds to `request` by writing into `response`.
    fn handle(&self, request: Request, response: &mut ResponseWriter<'_>);
}

impl<F> Handler for F
where
    F: Fn(Request, &mut ResponseWriter<'_>),
{
    #[inline]
    fn handle(&self, request: Request, response: &mut ResponseWriter<'_>) {
        self(request, response);
    }
}


/// A single FastCGI connection, driven over any [`Read`]/[`Write`] pair.
///
/// Records are read sequentially and fed into the connection's [`Session`]
/// until the peer closes the stream, a fatal error occurs, or the
/// [`CancelToken`] is cancelled.
pub struct Connection<'h, R, W: Write, H: ?Sized> {
    input: BufReader<R>,
    output: BufWriter<W>,
    handler: &'h H,
    reasons: &'h dyn ReasonPhrase,
    cancel: CancelToken,
    session: Session,
}

impl<'h, R, W, H> Connection<'h, R, W, H>
where
    R: Read,
    W: Write,
    H: Handler + ?Sized,
{
    /// Creates a new [`Connection`] which reads records from `input` and
    /// writes responses into `output`.
    pub fn new(input: R, output: W, config: &Config, handler: &'h H, reasons: &'h dyn ReasonPhrase) -> Self {
        Self {
            input: BufReader::with_capacity(config.aligned_bufsize(), input),
            output: BufWriter::new(output),
            handler,
            reasons,
            cancel: CancelToken::new(),
            session: Session::new(),
        }
    }

    /// Binds the connection to `token` instead of its own [`CancelToken`].
    #[must_use]
    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    /// Returns the [`CancelToken`] the connection observes.
    #[inline]
    #[must_use]
    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Returns the connection's request state.
    #[inline]
    #[must_use]
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Processes records until the peer closes the connection.
    ///
    /// Output is flushed after each record. The [`Session`] is
    /// [`Phase::Closed`] once this returns.
    ///
    /// # Errors
    /// Returns [`Error::Cancelled`] if the [`CancelToken`] was cancelled.
    /// Unreadable records, malformed `Params` records, and failed writes
    /// end the connection with the respective [`Error`].
    pub fn run(&mut self) -> Result<(), Error> {
        let res = self.process();
        self.session.close();
        res
    }

    fn process(&mut self) -> Result<(), Error> {
        loop {
            if self.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let record = match fcgi::read_record(&mut self.input) {
                Ok(rec) => rec,
                Err(ReadError::UnknownType { rtype, request_id }) => {
                    info!(rtype, request_id, "unknown FastCGI record type received");
                    let reply = fcgi::body::UnknownType { rtype }.to_record(request_id);
                    self.reply(&reply)?;
                    continue;
                },
                Err(_) if self.cancel.is_cancelled() => return Err(Error::Cancelled),
                Err(ReadError::StreamClosed) => {
                    debug!(completed = self.session.completed(), "FastCGI peer closed the connection");
                    return Ok(());
                },
                Err(e) => return Err(e.into()),
            };

            trace!(header = ?record.header, "record received");
            self.session.on_record(record, &mut self.output, self.handler, self.reasons)?;
            self.output.flush().map_err(Error::WriteFailure)?;
        }
    }

    fn reply(&mut self, record: &[u8]) -> Result<(), Error> {
        self.output.write_all(record)
            .and_then(|()| self.output.flush())
            .map_err(Error::WriteFailure)
    }
}

impl<R, W: Write, H: ?Sized> std::fmt::Debug for Connection<'_, R, W, H> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("cancel", &self.cancel)
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}


#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::io::Cursor;

    use super::*;
    use crate::cgi::response::CanonicalReasons;
    use crate::protocol::RecordType;
    use super::test_support::*;

    /// Forces a closure into a [`Handler`] with higher-ranked lifetimes.
    fn handler<F: Fn(Request, &mut ResponseWriter<'_>)>(f: F) -> F {
        f
    }

    fn run<H: Handler>(input: Vec<u8>, handler: &H) -> (Result<(), Error>, Vec<u8>) {
        let mut out = Vec::new();
        let config = Config::default();
        let mut conn = Connection::new(Cursor::new(input), &mut out, &config, handler, &CanonicalReasons);
        let res = conn.run();
        assert_eq!(conn.session().phase(), Phase::Closed);
        drop(conn);
        (res, out)
    }

    const SCENARIO_A: &[(&[u8], &[u8])] = &[
        (b"REQUEST_METHOD", b"GET"),
        (b"HTTP_HOST", b"x"),
        (b"REQUEST_URI", b"/a"),
        (b"SERVER_PORT", b"80"),
        (b"SERVER_PROTOCOL", b"HTTP/1.1"),
    ];

    #[test]
    fn get_dispatch() {
        let seen = RefCell::new(Vec::new());
        let h = handler(|req, _| seen.borrow_mut().push((req.method().to_owned(), req.raw_url().to_owned())));

        let mut input = Vec::new();
        add_begin(&mut input, 1);
        add_params(&mut input, 1, SCENARIO_A, usize::MAX);
        add_input(&mut input, 1, RecordType::Stdin, &[]);
        randomize_padding(&mut input);
        let (res, out) = run(input, &h);
        res.unwrap();

        assert_eq!(*seen.borrow(), [("GET".to_owned(), "http://x:80/a".to_owned())]);
        let recs = records(&out);
        let ends: Vec<_> = recs.iter().filter(|r| r.0 == RecordType::EndRequest).collect();
        assert_eq!(ends.len(), 1);
        assert_eq!(ends[0].1, 1);
        assert_eq!(end_request(&ends[0].2).protocol_status, fcgi::ProtocolStatus::RequestComplete);
        assert_eq!(recs.last().map(|r| r.0), Some(RecordType::EndRequest));
    }

    #[test]
    fn body_concatenated() {
        let bodies = RefCell::new(Vec::new());
        let h = handler(|mut req, _| {
            let mut body = Vec::new();
            req.read_to_end(&mut body).unwrap();
            bodies.borrow_mut().push(body);
        });

        let mut input = Vec::new();
        add_begin(&mut input, 5);
        add_params(&mut input, 5, GET_PARAMS, usize::MAX);
        add_input(&mut input, 5, RecordType::Stdin, &[b"first,", b"second"]);
        let (res, _) = run(input, &h);
        res.unwrap();
        assert_eq!(*bodies.borrow(), [b"first,second".to_vec()]);
    }

    #[test]
    fn response_ordering() {
        let h = handler(|_, resp| {
            resp.set_header("Content-Type", "text/plain");
            resp.start_response(200).unwrap();
            resp.write_all(b"hello").unwrap();
            resp.write_all(b" world").unwrap();
        });

        let mut input = Vec::new();
        add_begin(&mut input, 2);
        add_params(&mut input, 2, GET_PARAMS, usize::MAX);
        add_input(&mut input, 2, RecordType::Stdin, &[]);
        let (res, out) = run(input, &h);
        res.unwrap();

        let recs = records(&out);
        let contents: Vec<_> = recs.iter().map(|r| (r.0, &r.2[..])).collect();
        let expected: [(RecordType, &[u8]); 6] = [
            (RecordType::Stdout, b"HTTP/1.1 200 OK\r\n"),
            (RecordType::Stdout, b"Content-Type: text/plain\r\n\r\n"),
            (RecordType::Stdout, b"hello"),
            (RecordType::Stdout, b" world"),
            (RecordType::Stdout, b""),
            (RecordType::EndRequest, b"\0\0\0\xc8\0\0\0\0"),
        ];
        assert_eq!(contents, expected);
        assert_eq!(stdout_of(&recs, 2), b"HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\n\r\nhello world");
    }

    #[test]
    fn post_headers() {
        let headers = RefCell::new(Vec::new());
        let h = handler(|req, _| headers.borrow_mut().push(req.headers().clone()));

        const POST: &[(&[u8], &[u8])] = &[
            (b"REQUEST_METHOD", b"POST"),
            (b"CONTENT_TYPE", b"application/json"),
            (b"CONTENT_LENGTH", b"2"),
        ];
        const GET: &[(&[u8], &[u8])] = &[(b"REQUEST_METHOD", b"GET"), POST[1], POST[2]];
        let mut input = Vec::new();
        add_begin(&mut input, 1);
        add_params(&mut input, 1, POST, usize::MAX);
        add_input(&mut input, 1, RecordType::Stdin, &[b"{}"]);
        add_begin(&mut input, 1);
        add_params(&mut input, 1, GET, usize::MAX);
        add_input(&mut input, 1, RecordType::Stdin, &[]);
        let (res, _) = run(input, &h);
        res.unwrap();

        let headers = headers.borrow();
        assert_eq!(headers.len(), 2);
        assert_eq!(headers[0]["content-type"], "application/json");
        assert_eq!(headers[0]["content-length"], "2");
        assert!(headers[1].is_empty());
    }

    #[test]
    fn unknown_type_reply() {
        let count = RefCell::new(0);
        let h = handler(|_, _| *count.borrow_mut() += 1);

        let mut input = Vec::new();
        add_unk(&mut input, 0, 42);
        add_begin(&mut input, 1);
        add_unk(&mut input, 1, 200);
        add_params(&mut input, 1, GET_PARAMS, usize::MAX);
        add_input(&mut input, 1, RecordType::Stdin, &[]);
        let (res, out) = run(input, &h);
        res.unwrap();
        assert_eq!(*count.borrow(), 1);

        let recs = records(&out);
        assert_eq!(recs[0], (RecordType::Unknown, 0, b"\x2a\0\0\0\0\0\0\0".to_vec()));
        assert_eq!(recs[1], (RecordType::Unknown, 1, b"\xc8\0\0\0\0\0\0\0".to_vec()));
    }

    #[test]
    fn sequential_requests() {
        let ids = RefCell::new(Vec::new());
        let h = handler(|_, resp| ids.borrow_mut().push(resp.request_id()));

        let mut input = Vec::new();
        for id in [1, 7, 1] {
            add_begin(&mut input, id);
            add_params(&mut input, id, GET_PARAMS, usize::MAX);
            add_abort(&mut input, id);
            add_input(&mut input, id, RecordType::Stdin, &[b"x"]);
        }
        let (res, out) = run(input, &h);
        res.unwrap();
        assert_eq!(*ids.borrow(), [1, 7, 1]);

        let ends = records(&out).into_iter().filter(|r| r.0 == RecordType::EndRequest).count();
        assert_eq!(ends, 3);
    }

    #[test]
    fn large_response_split() {
        let payload = vec![b'z'; 3 * fcgi::MAX_CONTENT_LEN / 2];
        let h = handler(|_, resp| resp.write_all(&payload).unwrap());

        let mut input = Vec::new();
        add_begin(&mut input, 1);
        add_input(&mut input, 1, RecordType::Stdin, &[]);
        let (res, out) = run(input, &h);
        res.unwrap();

        let recs = records(&out);
        assert!(recs.iter().all(|r| r.2.len() <= fcgi::MAX_CONTENT_LEN));
        assert_eq!(stdout_of(&recs, 1)[2..], payload[..]);
    }

    #[test]
    fn truncated_stream() {
        let h = handler(|_, _| panic!("handler must not run"));
        let mut input = Vec::new();
        add_begin(&mut input, 1);
        add_params(&mut input, 1, GET_PARAMS, usize::MAX);
        input.truncate(input.len() - 3);
        let (res, _) = run(input, &h);
        assert!(matches!(res, Err(Error::Read(ReadError::TruncatedHeader(5)))));

        let mut input = Vec::new();
        add_begin(&mut input, 1);
        fcgi::write_record(&mut input, RecordType::Stdin, 1, b"0123456789").unwrap();
        input.truncate(input.len() - 8);
        let (res, _) = run(input, &h);
        assert!(matches!(res, Err(Error::Read(ReadError::TruncatedBody { expected: 16, read: 8 }))));
    }

    #[test]
    fn malformed_params() {
        let h = handler(|_, _| panic!("handler must not run"));
        let mut input = Vec::new();
        add_begin(&mut input, 1);
        add_params(&mut input, 1, SCENARIO_A, 7);
        add_input(&mut input, 1, RecordType::Stdin, &[]);
        let (res, out) = run(input, &h);
        assert!(matches!(res, Err(Error::Params(fcgi::Error::MalformedParams { .. }))));
        assert!(out.is_empty());
    }

    struct Broken;

    impl Write for Broken {
        fn write(&mut self, _: &[u8]) -> io::Result<usize> {
            Err(io::ErrorKind::BrokenPipe.into())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn handler_sees_write_errors() {
        let results = RefCell::new(Vec::new());
        let h = handler(|_, resp| {
            let mut results = results.borrow_mut();
            results.push(resp.start_response(200).map_err(|e| e.kind()));
            results.push(resp.write_all(b"hello").map_err(|e| e.kind()));
        });

        let mut input = Vec::new();
        add_begin(&mut input, 1);
        add_params(&mut input, 1, GET_PARAMS, usize::MAX);
        add_input(&mut input, 1, RecordType::Stdin, &[]);
        let config = Config::default();
        let mut conn = Connection::new(Cursor::new(input), Broken, &config, &h, &CanonicalReasons);
        let res = conn.run();
        drop(conn);

        let broken = Err(io::ErrorKind::BrokenPipe);
        assert_eq!(*results.borrow(), [broken, broken]);
        assert!(matches!(res, Err(Error::WriteFailure(e)) if e.kind() == io::ErrorKind::BrokenPipe));
    }

    #[test]
    fn cancelled_before_start() {
        let h = handler(|_, _| panic!("handler must not run"));
        let mut input = Vec::new();
        add_begin(&mut input, 1);
        add_input(&mut input, 1, RecordType::Stdin, &[]);

        let token = CancelToken::new();
        token.cancel();
        let mut out = Vec::new();
        let config = Config::default();
        let mut conn = Connection::new(Cursor::new(input), &mut out, &config, &h, &CanonicalReasons)
            .with_cancel(token);
        assert!(matches!(conn.run(), Err(Error::Cancelled)));
        assert_eq!(conn.session().phase(), Phase::Closed);
    }

    #[test]
    fn cancelled_by_handler() {
        let token = CancelToken::new();
        let count = RefCell::new(0);
        let h = handler(|_, _| {
            *count.borrow_mut() += 1;
            token.cancel();
        });

        let mut input = Vec::new();
        for id in [1, 2] {
            add_begin(&mut input, id);
            add_input(&mut input, id, RecordType::Stdin, &[]);
        }
        let mut out = Vec::new();
        let config = Config::default();
        let mut conn = Connection::new(Cursor::new(input), &mut out, &config, &h, &CanonicalReasons)
            .with_cancel(token.clone());
        assert!(matches!(conn.run(), Err(Error::Cancelled)));
        drop(conn);

        assert_eq!(*count.borrow(), 1);
        // The first response is still completed
        let recs = records(&out);
        assert_eq!(recs.last().map(|r| (r.0, r.1)), Some((RecordType::EndRequest, 1)));
    }
}
