use std::io::{self, Write};

use super::Error as ProtocolError;


/// The length prefix of a FastCGI name or value.
///
/// Lengths up to 127 take a single byte. Longer ones take four bytes in
/// network order, with the top bit set as a marker that is not part of the
/// length itself.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VarInt(u32);

impl VarInt {
    const MARKER: u32 = 1 << 31;
    /// The longest length with a 1-byte encoding.
    pub const SHORT_MAX: u32 = 0x7f;
    /// The longest length that can be encoded at all.
    pub const MAX: Self = VarInt(Self::MARKER - 1);

    /// Splits a length prefix off the start of `data`.
    ///
    /// Returns the length and the number of bytes its encoding occupied, or
    /// [`None`] if `data` ends inside the encoding.
    #[must_use]
    pub fn decode(data: &[u8]) -> Option<(Self, usize)> {
        match *data.first()? {
            short @ 0..=0x7f => Some((Self(short.into()), 1)),
            _ => {
                let long: [u8; 4] = data.get(..4)?.try_into().ok()?;
                Some((Self(u32::from_be_bytes(long) & !Self::MARKER), 4))
            },
        }
    }

    /// Returns the number of bytes [`VarInt::write`] produces.
    #[inline]
    #[must_use]
    pub fn encoded_len(self) -> usize {
        if self.0 <= Self::SHORT_MAX { 1 } else { 4 }
    }

    /// Writes the shortest encoding of the length, returning its size.
    ///
    /// # Errors
    /// Any errors from [`Write::write_all`] are forwarded to the caller.
    pub fn write(self, mut w: impl Write) -> io::Result<usize> {
        // The low byte of the long form doubles as the short form
        let long = (self.0 | Self::MARKER).to_be_bytes();
        let enc = &long[(long.len() - self.encoded_len())..];
        w.write_all(enc)?;
        Ok(enc.len())
    }

    /// Returns the length as a [`usize`], saturating on 16-bit targets.
    #[inline]
    #[must_use]
    pub fn to_usize(self) -> usize {
        usize::try_from(self.0).unwrap_or(usize::MAX)
    }
}

impl TryFrom<usize> for VarInt {
    type Error = ProtocolError;

    /// # Errors
    /// Returns [`ProtocolError::InvalidVarInt`] for lengths above
    /// [`VarInt::MAX`].
    fn try_from(len: usize) -> Result<Self, Self::Error> {
        u32::try_from(len).ok()
            .filter(|&len| len < Self::MARKER)
            .map(Self)
            .ok_or(ProtocolError::InvalidVarInt)
    }
}
