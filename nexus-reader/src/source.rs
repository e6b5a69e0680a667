//! Upstream character sources.
//!
//! A [`CharSource`] is the blocking side of a [`ParallelReader`]: the fill
//! loop pulls chunks from it on a background thread. Implementations may
//! block indefinitely and are only ever called from one thread at a time.
//!
//! [`ParallelReader`]: crate::ParallelReader

use std::io::{self, Read};
use std::str;

/// Default size of the byte buffer used by [`Utf8Source`].
const DEFAULT_BYTE_BUFFER_SIZE: usize = 8192;

/// A blocking, chunked source of characters.
pub trait CharSource: Send {
    /// Pulls up to `buf.len()` characters into `buf`.
    ///
    /// Returns the number of characters written. `Ok(0)` for a non-empty
    /// `buf` signals end of data. Errors of kind
    /// [`Interrupted`](io::ErrorKind::Interrupted) are retried by the caller.
    fn read_chars(&mut self, buf: &mut [char]) -> io::Result<usize>;

    /// Releases the underlying resource.
    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<S: CharSource + ?Sized> CharSource for Box<S> {
    fn read_chars(&mut self, buf: &mut [char]) -> io::Result<usize> {
        (**self).read_chars(buf)
    }

    fn close(&mut self) -> io::Result<()> {
        (**self).close()
    }
}

/// In-memory source over an owned sequence of characters.
///
/// # Example
///
/// ```
/// use nexus_reader::{CharSource, StrSource};
///
/// let mut source = StrSource::new("héllo");
/// let mut buf = ['\0'; 3];
/// assert_eq!(source.read_chars(&mut buf).unwrap(), 3);
/// assert_eq!(buf, ['h', 'é', 'l']);
/// ```
#[derive(Debug, Clone, Default)]
pub struct StrSource {
    chars: Vec<char>,
    pos: usize,
}

impl StrSource {
    /// Creates a source yielding the characters of `text`.
    pub fn new(text: &str) -> Self {
        Self::from_chars(text.chars().collect())
    }

    /// Creates a source yielding `chars` in order.
    pub fn from_chars(chars: Vec<char>) -> Self {
        Self { chars, pos: 0 }
    }

    /// Number of characters not yet read.
    pub fn remaining(&self) -> usize {
        self.chars.len() - self.pos
    }
}

impl CharSource for StrSource {
    fn read_chars(&mut self, buf: &mut [char]) -> io::Result<usize> {
        let n = buf.len().min(self.remaining());
        buf[..n].copy_from_slice(&self.chars[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

impl From<String> for StrSource {
    fn from(text: String) -> Self {
        Self::new(&text)
    }
}

impl From<&str> for StrSource {
    fn from(text: &str) -> Self {
        Self::new(text)
    }
}

/// Decodes UTF-8 from any byte reader.
///
/// Multi-byte sequences split across reads are carried over to the next
/// call. Invalid input, or a truncated sequence at end of input, fails
/// with [`InvalidData`](io::ErrorKind::InvalidData).
///
/// # Example
///
/// ```
/// use nexus_reader::{CharSource, Utf8Source};
///
/// let mut source = Utf8Source::new("naïve".as_bytes());
/// let mut buf = ['\0'; 8];
/// assert_eq!(source.read_chars(&mut buf).unwrap(), 5);
/// assert_eq!(source.read_chars(&mut buf).unwrap(), 0);
/// ```
#[derive(Debug)]
pub struct Utf8Source<R> {
    inner: R,
    bytes: Box<[u8]>,
    start: usize,
    end: usize,
    eof: bool,
}

impl<R: Read> Utf8Source<R> {
    /// Wraps `inner` with the default byte buffer size.
    pub fn new(inner: R) -> Self {
        Self::with_capacity(DEFAULT_BYTE_BUFFER_SIZE, inner)
    }

    /// Wraps `inner` with a byte buffer of `capacity` bytes (at least 4).
    pub fn with_capacity(capacity: usize, inner: R) -> Self {
        Self {
            inner,
            bytes: vec![0; capacity.max(4)].into_boxed_slice(),
            start: 0,
            end: 0,
            eof: false,
        }
    }

    /// Returns the wrapped reader, dropping any undecoded bytes.
    pub fn into_inner(self) -> R {
        self.inner
    }

    /// Decodes as many buffered characters as fit into `buf`.
    fn decode(&mut self, buf: &mut [char]) -> io::Result<usize> {
        let pending = &self.bytes[self.start..self.end];
        let valid = match str::from_utf8(pending) {
            Ok(text) => text,
            Err(e) => {
                if e.valid_up_to() == 0 {
                    if e.error_len().is_some() {
                        return Err(invalid_utf8());
                    }
                    return Ok(0);
                }
                str::from_utf8(&pending[..e.valid_up_to()]).map_err(|_| invalid_utf8())?
            }
        };

        let mut n = 0;
        let mut consumed = 0;
        for (slot, c) in buf.iter_mut().zip(valid.chars()) {
            *slot = c;
            n += 1;
            consumed += c.len_utf8();
        }
        self.start += consumed;
        Ok(n)
    }

    /// Moves undecoded bytes to the front and reads more after them.
    fn fill(&mut self) -> io::Result<()> {
        self.bytes.copy_within(self.start..self.end, 0);
        self.end -= self.start;
        self.start = 0;

        loop {
            match self.inner.read(&mut self.bytes[self.end..]) {
                Ok(0) => {
                    self.eof = true;
                    return Ok(());
                }
                Ok(n) => {
                    self.end += n;
                    return Ok(());
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }
}

impl<R: Read + Send> CharSource for Utf8Source<R> {
    fn read_chars(&mut self, buf: &mut [char]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        loop {
            let n = self.decode(buf)?;
            if n > 0 {
                return Ok(n);
            }
            if self.eof {
                if self.start < self.end {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        "truncated utf-8 sequence at end of input",
                    ));
                }
                return Ok(0);
            }
            self.fill()?;
        }
    }
}

fn invalid_utf8() -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, "stream did not contain valid utf-8")
}
