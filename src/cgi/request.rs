use std::io::{self, Cursor, Read};

use compact_str::CompactString;
use http::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_LENGTH, CONTENT_TYPE};

use super::{Params, Var};


/// The request body, readable from its start.
pub type Body = Cursor<Vec<u8>>;


/// An HTTP-style request assembled from a FastCGI request's CGI/1.1
/// environment and its `Stdin` stream.
///
/// A missing variable results in an empty string for the corresponding
/// accessor. The body is exposed via the [`Read`] impl on [`Request`].
#[derive(Debug, Clone)]
pub struct Request {
    method: CompactString,
    raw_url: String,
    url: Option<http::Uri>,
    protocol: CompactString,
    host: CompactString,
    user_agent: CompactString,
    headers: HeaderMap,
    env: Params,
    body: Body,
}

impl Request {
    /// Builds a [`Request`] with an empty body from a CGI/1.1 environment.
    ///
    /// The raw URL is composed as `http://{HTTP_HOST}:{SERVER_PORT}{REQUEST_URI}`.
    /// If it is not a valid URI, `Request::url` returns [`None`]. The
    /// `Content-Type` and `Content-Length` headers are only carried over for
    /// `POST` requests.
    #[must_use]
    pub fn from_params(env: Params) -> Self {
        let var = |v: Var| env.get(v.name()).cloned().unwrap_or_default();
        let method = var(Var::REQUEST_METHOD);
        let host = var(Var::HTTP_HOST);
        let path = var(Var::REQUEST_URI);
        let port = var(Var::SERVER_PORT);
        let protocol = var(Var::SERVER_PROTOCOL);
        let user_agent = var(Var::HTTP_USER_AGENT);

        let raw_url = format!("http://{host}:{port}{path}");
        let url = match raw_url.parse::<http::Uri>() {
            Ok(u) => Some(u),
            Err(e) => {
                let error: &dyn std::error::Error = &e;
                tracing::debug!(%raw_url, error, "request URL is not a valid URI");
                None
            },
        };

        let mut headers = HeaderMap::new();
        if method == "POST" {
            copy_header(&env, &mut headers, Var::CONTENT_TYPE, CONTENT_TYPE);
            copy_header(&env, &mut headers, Var::CONTENT_LENGTH, CONTENT_LENGTH);
        }

        Self {
            method, raw_url, url, protocol, host, user_agent, headers, env,
            body: Body::default(),
        }
    }

    /// Replaces the request body, resetting its read position.
    #[must_use]
    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = Cursor::new(body);
        self
    }

    /// Returns the request method, such as `GET`.
    #[inline]
    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Parses the request method into an [`http::Method`], if it is valid.
    #[must_use]
    pub fn http_method(&self) -> Option<http::Method> {
        http::Method::from_bytes(self.method.as_bytes()).ok()
    }

    /// Returns the URL composed from the host, port, and request URI.
    #[inline]
    #[must_use]
    pub fn raw_url(&self) -> &str {
        &self.raw_url
    }

    /// Returns the parsed form of `Request::raw_url`, unless parsing failed.
    #[inline]
    #[must_use]
    pub fn url(&self) -> Option<&http::Uri> {
        self.url.as_ref()
    }

    /// Returns the protocol version, such as `HTTP/1.1`.
    #[inline]
    #[must_use]
    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    /// Returns the value of the `Host` header.
    #[inline]
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Returns the value of the `User-Agent` header.
    #[inline]
    #[must_use]
    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    /// Returns the entity headers describing the body of a `POST` request.
    #[inline]
    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Retrieves a CGI/1.1 variable from the request's environment.
    #[must_use]
    pub fn get_var(&self, name: &str) -> Option<&str> {
        self.env.get(name).map(CompactString::as_str)
    }

    /// Returns the complete CGI/1.1 environment of the request.
    #[inline]
    #[must_use]
    pub fn env(&self) -> &Params {
        &self.env
    }

    /// Returns the full request body, regardless of how much was read.
    #[inline]
    #[must_use]
    pub fn body(&self) -> &[u8] {
        self.body.get_ref()
    }
}

impl Read for Request {
    #[inline]
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.body.read(buf)
    }
}


fn copy_header(env: &Params, headers: &mut HeaderMap, var: Var, name: HeaderName) {
    let Some(raw) = env.get(var.name()) else { return; };
    match HeaderValue::from_str(raw) {
        Ok(v) => {
            headers.insert(name, v);
        },
        Err(_) => tracing::debug!(%var, value = %raw.escape_default(), "invalid header value skipped"),
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> Params {
        pairs.iter().map(|&(n, v)| (n.into(), v.into())).collect()
    }

    const GET: &[(&str, &str)] = &[
        ("REQUEST_METHOD", "GET"),
        ("HTTP_HOST", "example.com"),
        ("REQUEST_URI", "/a/b?c=d"),
        ("SERVER_PORT", "8080"),
        ("SERVER_PROTOCOL", "HTTP/1.1"),
        ("HTTP_USER_AGENT", "curl/8.0"),
        ("CONTENT_TYPE", "text/plain"),
        ("CONTENT_LENGTH", "5"),
    ];

    #[test]
    fn basic_fields() {
        let req = Request::from_params(env(GET));
        assert_eq!(req.method(), "GET");
        assert_eq!(req.http_method(), Some(http::Method::GET));
        assert_eq!(req.raw_url(), "http://example.com:8080/a/b?c=d");
        assert_eq!(req.protocol(), "HTTP/1.1");
        assert_eq!(req.host(), "example.com");
        assert_eq!(req.user_agent(), "curl/8.0");
        assert_eq!(req.get_var("SERVER_PORT"), Some("8080"));
        assert_eq!(req.env().len(), GET.len());

        let url = req.url().expect("URL should parse");
        assert_eq!(url.host(), Some("example.com"));
        assert_eq!(url.port_u16(), Some(8080));
        assert_eq!(url.path(), "/a/b");
        assert_eq!(url.query(), Some("c=d"));
    }

    #[test]
    fn post_only_headers() {
        let req = Request::from_params(env(GET));
        assert!(req.headers().is_empty());

        let mut post = env(GET);
        post.insert("REQUEST_METHOD".into(), "POST".into());
        let req = Request::from_params(post);
        assert_eq!(req.headers().len(), 2);
        assert_eq!(req.headers()[CONTENT_TYPE], "text/plain");
        assert_eq!(req.headers()[CONTENT_LENGTH], "5");

        let req = Request::from_params(env(&[("REQUEST_METHOD", "POST")]));
        assert!(req.headers().is_empty());
    }

    #[test]
    fn missing_vars() {
        let req = Request::from_params(Params::new());
        assert_eq!(req.method(), "");
        assert_eq!(req.host(), "");
        assert_eq!(req.user_agent(), "");
        assert_eq!(req.raw_url(), "http://:");
        assert!(req.http_method().is_none());
    }

    #[test]
    fn invalid_url_tolerated() {
        let mut vars = env(GET);
        vars.insert("HTTP_HOST".into(), "bad host".into());
        let req = Request::from_params(vars);
        assert_eq!(req.raw_url(), "http://bad host:8080/a/b?c=d");
        assert!(req.url().is_none());
        assert_eq!(req.host(), "bad host");
    }

    #[test]
    fn body_stream() -> io::Result<()> {
        let mut req = Request::from_params(env(GET)).with_body(b"hello world".to_vec());
        let mut head = [0; 5];
        req.read_exact(&mut head)?;
        assert_eq!(&head, b"hello");

        let mut rest = String::new();
        req.read_to_string(&mut rest)?;
        assert_eq!(rest, " world");
        assert_eq!(req.body(), b"hello world");
        Ok(())
    }
}
