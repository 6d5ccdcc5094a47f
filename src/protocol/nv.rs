use std::collections::HashMap;
use std::io::prelude::*;

use compact_str::CompactString;

use super::varint::VarInt;
use super::Error as ProtocolError;


/// A decoded set of CGI/1.1 variables, as carried by `Params` records.
pub type Params = HashMap<CompactString, CompactString>;


/// An iterator decoding complete name-value pairs from its input.
///
/// Iteration stops at the first pair that does not fit into the remaining
/// input. [`NVIter::into_inner`] then returns the undecodable tail.
#[derive(Debug, Clone)]
pub struct NVIter<'a> {
    data: &'a [u8],
}

impl<'a> NVIter<'a> {
    /// Creates a new [`NVIter`] over the referenced input bytes.
    #[inline]
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    /// Extracts the remaining input bytes from the iterator.
    #[inline]
    #[must_use]
    pub fn into_inner(self) -> &'a [u8] {
        self.data
    }
}

impl<'a> Iterator for NVIter<'a> {
    /// The name-value pair returned by the iterator.
    type Item = (&'a [u8], &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        let (name_len, used) = VarInt::decode(self.data)?;
        let cur = &self.data[used..];
        let (val_len, used) = VarInt::decode(cur)?;
        let cur = &cur[used..];

        let name_len = name_len.to_usize();
        let total_len = name_len.checked_add(val_len.to_usize())?;
        if cur.len() >= total_len {
            self.data = &cur[total_len..];
            Some((&cur[..name_len], &cur[name_len..total_len]))
        } else {
            None
        }
    }
}

impl std::iter::FusedIterator for NVIter<'_> {}


/// Decodes one `Params` record's content into a name-value mapping.
///
/// Names and values are converted to strings lossily. A name that appears
/// more than once keeps its last value.
///
/// # Errors
/// Returns [`ProtocolError::MalformedParams`] if a length prefix or a
/// name-value pair runs past the end of `content`.
pub fn decode(content: &[u8]) -> Result<Params, ProtocolError> {
    let mut params = Params::new();
    decode_into(content, &mut params)?;
    Ok(params)
}

/// Decodes one `Params` record's content and merges it into `params`.
///
/// Pairs preceding a malformed one are kept in `params`.
///
/// # Errors
/// Returns [`ProtocolError::MalformedParams`] if a length prefix or a
/// name-value pair runs past the end of `content`.
pub fn decode_into(content: &[u8], params: &mut Params) -> Result<(), ProtocolError> {
    let mut nvit = NVIter::new(content);
    params.extend((&mut nvit).map(|(n, v)| {
        (CompactString::from_utf8_lossy(n), CompactString::from_utf8_lossy(v))
    }));

    match nvit.into_inner() {
        [] => Ok(()),
        rest => Err(ProtocolError::MalformedParams {
            offset: content.len() - rest.len(),
            len: content.len(),
        }),
    }
}


/// Encodes a name-value pair into the writer's output.
///
/// # Errors
/// Returns [`ProtocolError::InvalidVarInt`] if either length exceeds
/// [`VarInt::MAX`]. Any errors from [`Write::write_all`] are forwarded to
/// the caller.
pub fn write((name, value): (&[u8], &[u8]), mut w: impl Write) -> Result<usize, ProtocolError> {
    let mut written = VarInt::try_from(name.len())?.write(&mut w)?;
    written += VarInt::try_from(value.len())?.write(&mut w)?;
    w.write_all(name)?;
    w.write_all(value)?;
    Ok(written + name.len() + value.len())
}

/// Encodes a sequence of name-value pairs into a new buffer.
///
/// # Errors
/// Returns [`ProtocolError::InvalidVarInt`] if any length exceeds
/// [`VarInt::MAX`].
pub fn encode<'a, I>(pairs: I) -> Result<Vec<u8>, ProtocolError>
where
    I: IntoIterator<Item = (&'a [u8], &'a [u8])>,
{
    let mut buf = Vec::new();
    for nv in pairs {
        write(nv, &mut buf)?;
    }
    Ok(buf)
}
