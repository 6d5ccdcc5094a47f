use std::num::NonZeroUsize;


/// Runtime settings shared by all connections of a [`Runner`](crate::server::Runner).
#[derive(Debug, Clone)]
pub struct Config {
    /// The capacity of each connection's read buffer, in bytes.
    ///
    /// Values are rounded up to a multiple of 8 and to at least
    /// [`Config::MIN_BUF_SIZE`].
    pub buffer_size: usize,
    /// The maximum number of connections served at the same time.
    pub max_conns: NonZeroUsize,
}

impl Config {
    /// The default read buffer size. It holds a maximum-size record plus
    /// the following header.
    pub const DEFAULT_BUF_SIZE: usize = 8 + u16::MAX as usize + 1 + 8;
    /// The smallest read buffer size used.
    pub const MIN_BUF_SIZE: usize = 512;

    /// Creates a [`Config`] with the given connection limit and a default
    /// buffer size.
    #[inline]
    #[must_use]
    pub fn with_conns(max_conns: NonZeroUsize) -> Self {
        Self { buffer_size: Self::DEFAULT_BUF_SIZE, max_conns }
    }

    /// Returns `buffer_size` rounded to the limits documented on the field.
    #[must_use]
    pub(crate) fn aligned_bufsize(&self) -> usize {
        let size = self.buffer_size.max(Self::MIN_BUF_SIZE);
        size.checked_add(7).map_or(size, |s| s & !7)
    }
}

impl Default for Config {
    /// Allows 64 concurrent connections.
    fn default() -> Self {
        const DEFAULT_CONNS: NonZeroUsize = match NonZeroUsize::new(64) {
            Some(n) => n,
            None => unreachable!(),
        };
        Self::with_conns(DEFAULT_CONNS)
    }
}
