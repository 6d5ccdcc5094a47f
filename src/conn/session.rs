use std::io::Write;

use tracing::{debug, info};

use super::{Error, Handler, ResponseWriter, APP_STATUS};
use crate::cgi::{self, response::ReasonPhrase};
use crate::macros::trace;
use crate::protocol::{self as fcgi, nv, Record, RecordType};


/// The processing phase of a connection's request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// No request has been started yet.
    AwaitingBegin,
    /// A `BeginRequest` record was accepted, the environment is being received.
    CollectingParams,
    /// At least one non-empty `Stdin` record was received.
    CollectingBody,
    /// The last request was handed to the handler and completed.
    Dispatched,
    /// The connection is gone. No further records are processed.
    Closed,
}


/// The request currently being assembled.
#[derive(Debug)]
struct Exchange {
    request_id: u16,
    params: cgi::Params,
    body: Vec<u8>,
}


/// The per-connection request state machine.
///
/// One request is processed at a time. A `BeginRequest` for another request
/// ID while a request is in progress is refused with
/// [`ProtocolStatus::CantMpxConn`](fcgi::ProtocolStatus::CantMpxConn).
#[derive(Debug)]
pub struct Session {
    phase: Phase,
    exchange: Option<Exchange>,
    completed: u64,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    /// Creates a [`Session`] waiting for its first request.
    #[must_use]
    pub fn new() -> Self {
        Self { phase: Phase::AwaitingBegin, exchange: None, completed: 0 }
    }

    /// Returns the current processing phase.
    #[inline]
    #[must_use]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Returns the ID of the request in progress, if any.
    #[inline]
    #[must_use]
    pub fn request_id(&self) -> Option<u16> {
        self.exchange.as_ref().map(|ex| ex.request_id)
    }

    /// Returns the number of requests dispatched so far.
    #[inline]
    #[must_use]
    pub fn completed(&self) -> u64 {
        self.completed
    }

    /// Marks the session as closed and drops any partial request.
    pub fn close(&mut self) {
        if let Some(ex) = self.exchange.take() {
            debug!(request_id = ex.request_id, phase = ?self.phase, "connection closed with request in progress");
        }
        self.phase = Phase::Closed;
    }

    /// Advances the state machine by one record.
    ///
    /// Replies and responses are written into `out`. Completing a request
    /// calls `handler` synchronously, so this blocks until the handler
    /// returns.
    ///
    /// # Errors
    /// Returns [`Error::Params`] if a `Params` record cannot be decoded and
    /// [`Error::WriteFailure`] if writing into `out` fails.
    pub fn on_record<H>(
        &mut self,
        record: Record,
        out: &mut dyn Write,
        handler: &H,
        reasons: &dyn ReasonPhrase,
    ) -> Result<(), Error>
    where
        H: Handler + ?Sized,
    {
        if self.phase == Phase::Closed {
            debug!(header = ?record.header, "record after close ignored");
            return Ok(());
        }

        let request_id = record.request_id();
        match record.rtype() {
            RecordType::BeginRequest => self.begin(request_id, &record.content, out),
            RecordType::AbortRequest => {
                // Aborts are not acted upon, the request runs to completion
                info!(request_id, "AbortRequest record ignored");
                Ok(())
            },
            RecordType::Params | RecordType::Stdin | RecordType::Data => {
                self.stream(record, out, handler, reasons)
            },
            rtype if rtype.is_management() => {
                debug!(?rtype, "management record ignored");
                Ok(())
            },
            rtype => {
                debug!(request_id, ?rtype, "application record ignored");
                Ok(())
            },
        }
    }

    fn begin(&mut self, request_id: u16, content: &[u8], out: &mut dyn Write) -> Result<(), Error> {
        match &self.exchange {
            Some(ex) if ex.request_id == request_id => {
                debug!(request_id, "duplicate BeginRequest record ignored");
            },
            Some(ex) => {
                info!(request_id, active = ex.request_id, "multiplexed request refused");
                let end = fcgi::body::EndRequest {
                    app_status: 0,
                    protocol_status: fcgi::ProtocolStatus::CantMpxConn,
                };
                out.write_all(&end.to_record(request_id)).map_err(Error::WriteFailure)?;
            },
            None if request_id == fcgi::FCGI_NULL_REQUEST_ID => {
                info!("BeginRequest record with null request ID ignored");
            },
            None => {
                match fcgi::body::BeginRequest::from_content(content) {
                    Some(begin) => debug!(request_id, role = ?begin.role, flags = ?begin.flags, "new request started"),
                    None => debug!(request_id, len = content.len(), "new request started with invalid BeginRequest body"),
                }
                self.exchange = Some(Exchange { request_id, params: cgi::Params::new(), body: Vec::new() });
                self.phase = Phase::CollectingParams;
            },
        }
        Ok(())
    }

    fn stream<H>(
        &mut self,
        record: Record,
        out: &mut dyn Write,
        handler: &H,
        reasons: &dyn ReasonPhrase,
    ) -> Result<(), Error>
    where
        H: Handler + ?Sized,
    {
        let request_id = record.request_id();
        let rtype = record.rtype();
        let ex = match &mut self.exchange {
            Some(ex) if ex.request_id == request_id => ex,
            _ => {
                debug!(request_id, ?rtype, "stream record without active request ignored");
                return Ok(());
            },
        };

        match rtype {
            RecordType::Params if record.content.is_empty() => {
                trace!(request_id, vars = ex.params.len(), "Params stream ended");
            },
            RecordType::Params => {
                nv::decode_into(&record.content, &mut ex.params).map_err(Error::Params)?;
            },
            RecordType::Stdin if record.content.is_empty() => {
                return self.dispatch(out, handler, reasons);
            },
            RecordType::Stdin => {
                if ex.body.is_empty() {
                    ex.body = record.content;
                } else {
                    ex.body.extend_from_slice(&record.content);
                }
                self.phase = Phase::CollectingBody;
            },
            _ => ex.body.extend_from_slice(&record.content),
        }
        Ok(())
    }

    fn dispatch<H>(&mut self, out: &mut dyn Write, handler: &H, reasons: &dyn ReasonPhrase) -> Result<(), Error>
    where
        H: Handler + ?Sized,
    {
        let Some(ex) = self.exchange.take() else { return Ok(()); };
        let request = cgi::Request::from_params(ex.params).with_body(ex.body);
        debug!(
            request_id = ex.request_id, method = request.method(), url = request.raw_url(),
            body_len = request.body().len(), "dispatching request"
        );

        let mut response = ResponseWriter::new(out, reasons, ex.request_id);
        handler.handle(request, &mut response);
        self.phase = Phase::Dispatched;
        self.completed += 1;
        response.complete(APP_STATUS).map_err(Error::WriteFailure)
    }
}
