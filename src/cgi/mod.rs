use std::fmt;

mod request;
pub mod response;

pub use crate::protocol::nv::Params;
pub use request::{Body, Request};


/// A CGI/1.1 meta variable name consumed by this crate.
///
/// The variants convert into their canonical spelling, for example
/// `Var::REQUEST_METHOD.name() == "REQUEST_METHOD"`, which is the key
/// used in [`Params`].
#[allow(missing_docs, non_camel_case_types, clippy::upper_case_acronyms)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[derive(strum::AsRefStr, strum::IntoStaticStr, strum::EnumString, strum::EnumIter)]
#[strum(use_phf, serialize_all = "SCREAMING_SNAKE_CASE")]
#[non_exhaustive]
pub enum Var {
    // From RFC 3875, Section 4.1 (CGI/1.1)
    CONTENT_LENGTH,
    CONTENT_TYPE,
    GATEWAY_INTERFACE,
    QUERY_STRING,
    REMOTE_ADDR,
    REQUEST_METHOD,
    SCRIPT_NAME,
    SERVER_NAME,
    SERVER_PORT,
    SERVER_PROTOCOL,

    // From web server extensions
    REQUEST_URI,
    DOCUMENT_URI,

    // Mapped HTTP request headers
    HTTP_HOST,
    HTTP_USER_AGENT,
}

impl Var {
    /// Returns the canonical spelling of the variable name.
    #[inline]
    #[must_use]
    pub fn name(self) -> &'static str {
        self.into()
    }
}

impl fmt::Display for Var {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}
