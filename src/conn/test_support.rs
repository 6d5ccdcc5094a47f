use std::iter::repeat_with;

use crate::protocol as fcgi;


pub(crate) const GET_PARAMS: &[(&[u8], &[u8])] = &[
    (b"REQUEST_METHOD", b"GET"),
    (b"HTTP_HOST", b"example.com"),
    (b"SERVER_PORT", b"80"),
    (b"REQUEST_URI", b"/hello?who=world"),
    (b"SERVER_PROTOCOL", b"HTTP/1.1"),
    (b"HTTP_USER_AGENT", b"curl/8.0"),
    (b"GATEWAY_INTERFACE", b"CGI/1.1"),
    (b"HTTP_X_NOT_UTF8", b"\x9a\xdaM\xeb\x82"),
];


pub(crate) fn add_unk(buf: &mut Vec<u8>, req_id: u16, rtype: u8) {
    let rand_len = fastrand::u16(10..512);
    let mut head = [0; 8];
    head[0] = 1;
    head[1] = rtype;
    head[2..4].copy_from_slice(&req_id.to_be_bytes());
    head[4..6].copy_from_slice(&rand_len.to_be_bytes());
    buf.extend(head);
    buf.extend(repeat_with(|| fastrand::u8(..)).take(rand_len.into()));
}

/// Uses [`fcgi::Role::Responder`] and [`fcgi::RequestFlags::KeepConn`].
pub(crate) fn add_begin(buf: &mut Vec<u8>, req_id: u16) {
    buf.extend(fcgi::body::BeginRequest {
        role: fcgi::Role::Responder, flags: fcgi::RequestFlags::KeepConn,
    }.to_record(req_id));
}

pub(crate) fn add_abort(buf: &mut Vec<u8>, req_id: u16) {
    buf.extend(fcgi::RecordHeader::new(fcgi::RecordType::AbortRequest, req_id).to_bytes());
}

pub(crate) fn add_get_vals(buf: &mut Vec<u8>) {
    const VALS: &[u8] = b"\x0e\x00FCGI_MAX_CONNS\x0d\x00FCGI_MAX_REQS\x0f\x00FCGI_MPXS_CONNS";
    buf.extend(
        fcgi::encode(fcgi::RecordType::GetValues, fcgi::FCGI_NULL_REQUEST_ID, VALS)
            .expect("GetValues record should fit"),
    );
}

/// Encodes `params` into records carrying at most `chunk` bytes each, cutting
/// through pairs where they fall, followed by the empty stream terminator.
pub(crate) fn add_params(buf: &mut Vec<u8>, req_id: u16, params: &[(&[u8], &[u8])], chunk: usize) {
    let block = fcgi::nv::encode(params.iter().copied()).expect("params should encode");
    for part in block.chunks(chunk) {
        fcgi::write_record(buf, fcgi::RecordType::Params, req_id, part).expect("Vec writes are infallible");
    }
    buf.extend(fcgi::RecordHeader::new(fcgi::RecordType::Params, req_id).to_bytes());
}

/// Adds one record per element of `parts`, followed by the empty stream
/// terminator.
pub(crate) fn add_input(buf: &mut Vec<u8>, req_id: u16, stream: fcgi::RecordType, parts: &[&[u8]]) {
    assert!(stream.is_input_stream());
    for part in parts {
        fcgi::write_record(buf, stream, req_id, part).expect("Vec writes are infallible");
    }
    buf.extend(fcgi::RecordHeader::new(stream, req_id).to_bytes());
}

pub(crate) fn randomize_padding(buf: &mut Vec<u8>) {
    let mut head_start = 0;
    while let Some(head) = buf.get_mut(head_start..(head_start + 8)) {
        let payload = u16::from_be_bytes([head[4], head[5]]);
        let old_pad = head[6];
        let new_pad = fastrand::u8(..);
        head[6] = new_pad;

        head_start += 8 + usize::from(payload);
        buf.splice(
            head_start..(head_start + usize::from(old_pad)),
            repeat_with(|| fastrand::u8(..)).take(new_pad.into()),
        );
        head_start += usize::from(new_pad);
    }
}


/// Splits raw output into (type, request ID, content) triples, asserting
/// that every record is 8-byte aligned.
pub(crate) fn records(mut out: &[u8]) -> Vec<(fcgi::RecordType, u16, Vec<u8>)> {
    let mut recs = Vec::new();
    while !out.is_empty() {
        let rec = fcgi::read_record(&mut out).expect("output should be well-formed");
        assert_eq!(rec.header.body_len() % 8, 0, "output record is not 8-byte aligned");
        recs.push((rec.rtype(), rec.request_id(), rec.content));
    }
    recs
}

/// Concatenates the `Stdout` stream of `req_id` in `recs`.
pub(crate) fn stdout_of(recs: &[(fcgi::RecordType, u16, Vec<u8>)], req_id: u16) -> Vec<u8> {
    recs.iter()
        .filter(|(t, id, _)| *t == fcgi::RecordType::Stdout && *id == req_id)
        .flat_map(|(_, _, c)| c.iter().copied())
        .collect()
}

/// Decodes the body of an `EndRequest` record.
pub(crate) fn end_request(content: &[u8]) -> fcgi::body::EndRequest {
    let data = <[u8; 8]>::try_from(content).expect("EndRequest body should be 8 bytes");
    fcgi::body::EndRequest::from_bytes(data).expect("EndRequest body should be valid")
}
