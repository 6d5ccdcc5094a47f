use std::io::{self, Write};

use smallvec::SmallVec;


/// A lookup from HTTP status codes to their reason phrases.
///
/// The lookup is handed to each [`ResponseWriter`](crate::conn::ResponseWriter)
/// when the connection is set up, so applications can replace the phrases
/// without any global state.
pub trait ReasonPhrase {
    /// Returns the reason phrase for `status`, or an empty string if there
    /// is none.
    fn reason_phrase(&self, status: u16) -> &str;
}

/// The canonical reason phrases registered with IANA, as provided by
/// [`http::StatusCode::canonical_reason`].
#[derive(Debug, Default, Clone, Copy)]
pub struct CanonicalReasons;

impl ReasonPhrase for CanonicalReasons {
    fn reason_phrase(&self, status: u16) -> &str {
        http::StatusCode::from_u16(status).ok()
            .and_then(|s| s.canonical_reason())
            .unwrap_or_default()
    }
}

impl<F> ReasonPhrase for F
where
    F: Fn(u16) -> Option<&'static str>,
{
    #[inline]
    fn reason_phrase(&self, status: u16) -> &str {
        self(status).unwrap_or_default()
    }
}


/// Writes an HTTP/1.1 status line such as `HTTP/1.1 200 OK\r\n`.
///
/// # Errors
/// Any errors from [`Write::write_all`] are forwarded to the caller.
pub fn write_status_line(mut w: impl Write, status: u16, reason: &str) -> io::Result<usize> {
    let mut code = [0; 5];
    let code_len = {
        let mut cur = &mut code[..];
        write!(cur, "{status}")?;
        5 - cur.len()
    };

    w.write_all(b"HTTP/1.1 ")?;
    w.write_all(&code[..code_len])?;
    w.write_all(b" ")?;
    w.write_all(reason.as_bytes())?;
    w.write_all(b"\r\n")?;
    Ok(9 + code_len + 1 + reason.len() + 2)
}

/// Writes a block of `name: value` header lines terminated by an empty line.
///
/// # Errors
/// Returns [`io::ErrorKind::InvalidInput`] before writing anything if a
/// header value contains a line break. Any errors from [`Write::write_all`]
/// are forwarded to the caller.
pub fn write_header_block<'a, W, I>(mut w: W, headers: I) -> io::Result<usize>
where
    W: Write,
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let headers: SmallVec<[(&str, &str); 16]> = headers.into_iter().collect();
    if let Some((name, _)) = headers.iter().find(|(_, val)| val.contains(&['\r', '\n'][..])) {
        let msg = format!("header value for {name} spans lines");
        return Err(io::Error::new(io::ErrorKind::InvalidInput, msg));
    }

    let mut written = 0;
    for (name, val) in headers {
        w.write_all(name.as_bytes())?;
        w.write_all(b": ")?;
        w.write_all(val.as_bytes())?;
        w.write_all(b"\r\n")?;
        written += name.len() + val.len() + 4;
    }

    w.write_all(b"\r\n")?;
    Ok(written + 2)
}
