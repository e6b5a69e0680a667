//! The consumer-facing reader.

use std::fmt;
use std::io;
use std::sync::Arc;

use nexus_ring::{Consumer, ring_buffer};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::BuildError;
use crate::fill::{Fill, Shared, Upstream};
use crate::scheduler::{Scheduler, default_scheduler};
use crate::source::CharSource;
use crate::wait::{ParkNanos, WaitingStrategy};

/// Default requested ring buffer size, in characters.
pub const DEFAULT_RING_BUFFER_SIZE: usize = 64 * 1024;

/// Default number of characters pulled from upstream per read.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 8192;

/// Size of the scratch buffer used by [`ParallelReader::read_to_string`].
const DRAIN_CHUNK: usize = 1024;

/// Sequential character reader fed by a background fill loop.
///
/// Opening a reader starts a fill loop on the configured [`Scheduler`]
/// that pulls chunks from the upstream [`CharSource`] into a lock-free
/// ring. Reads take characters from the ring and only wait (through the
/// [`WaitingStrategy`]) when the ring is empty and the fill loop is still
/// running.
///
/// Reads take `&mut self`: a reader has exactly one consumer.
///
/// # Errors
///
/// An upstream error is held back until every character produced before
/// it has been read. From then on every read returns an error of the same
/// [`kind`](io::Error::kind) (see [`UpstreamError`](crate::UpstreamError)).
///
/// # Closing
///
/// [`close`](Self::close) asks the fill loop to stop and closes the
/// upstream source. The fill loop notices the request on its next
/// iteration; a chunk read already blocked inside the source is not
/// interrupted, and `close` waits for it to return before closing the
/// source.
pub struct ParallelReader {
    ring: Consumer,
    shared: Arc<Shared>,
    upstream: Upstream,
    waiting: Arc<dyn WaitingStrategy>,
    closed: bool,
    /// Latched once a read has reported end of stream.
    finished: bool,
}

impl ParallelReader {
    /// Opens a reader over `source` with default settings.
    ///
    /// # Example
    ///
    /// ```
    /// use nexus_reader::{ParallelReader, StrSource};
    ///
    /// let mut reader = ParallelReader::new(StrSource::new("hi")).unwrap();
    /// assert_eq!(reader.read_char().unwrap(), Some('h'));
    /// assert_eq!(reader.read_char().unwrap(), Some('i'));
    /// assert_eq!(reader.read_char().unwrap(), None);
    /// ```
    pub fn new<S: CharSource + 'static>(source: S) -> Result<Self, BuildError> {
        Builder::new().open(source)
    }

    /// Returns a builder for custom settings.
    pub fn builder() -> Builder {
        Builder::new()
    }

    /// Reads one character. Returns `Ok(None)` at end of stream.
    pub fn read_char(&mut self) -> io::Result<Option<char>> {
        if self.finished {
            return Ok(None);
        }
        loop {
            if let Some(c) = self.ring.pop() {
                return Ok(Some(c));
            }
            if self.exhausted()? {
                return Ok(None);
            }
        }
    }

    /// Reads up to `buf.len()` characters into `buf`.
    ///
    /// Returns the number of characters read. `Ok(0)` for a non-empty
    /// `buf` means end of stream.
    ///
    /// # Example
    ///
    /// ```
    /// use nexus_reader::{ParallelReader, StrSource};
    ///
    /// let mut reader = ParallelReader::new(StrSource::new("abc")).unwrap();
    /// let mut buf = ['\0'; 8];
    ///
    /// let mut total = 0;
    /// loop {
    ///     let n = reader.read(&mut buf[total..]).unwrap();
    ///     if n == 0 {
    ///         break;
    ///     }
    ///     total += n;
    /// }
    /// assert_eq!(&buf[..total], &['a', 'b', 'c']);
    /// ```
    pub fn read(&mut self, buf: &mut [char]) -> io::Result<usize> {
        if buf.is_empty() || self.finished {
            return Ok(0);
        }

        loop {
            let n = self.ring.read_into(buf);
            if n > 0 {
                return Ok(n);
            }
            if self.exhausted()? {
                return Ok(0);
            }
        }
    }

    /// Reads up to `len` characters into `buf[offset..offset + len]`.
    ///
    /// # Panics
    ///
    /// Panics if `offset + len` exceeds `buf.len()`.
    pub fn read_at(&mut self, buf: &mut [char], offset: usize, len: usize) -> io::Result<usize> {
        let end = offset
            .checked_add(len)
            .filter(|&end| end <= buf.len())
            .unwrap_or_else(|| {
                panic!(
                    "range {offset}..{offset}+{len} out of bounds for buffer of length {}",
                    buf.len()
                )
            });
        self.read(&mut buf[offset..end])
    }

    /// Reads everything up to end of stream, appending to `out`.
    ///
    /// Returns the number of characters appended.
    pub fn read_to_string(&mut self, out: &mut String) -> io::Result<usize> {
        let mut buf = ['\0'; DRAIN_CHUNK];
        let mut total = 0;
        loop {
            let n = self.read(&mut buf)?;
            if n == 0 {
                return Ok(total);
            }
            out.extend(&buf[..n]);
            total += n;
        }
    }

    /// Returns an iterator over the remaining characters.
    ///
    /// # Example
    ///
    /// ```
    /// use nexus_reader::{ParallelReader, StrSource};
    ///
    /// let mut reader = ParallelReader::new(StrSource::new("xyz")).unwrap();
    /// let text: String = reader.chars().collect::<std::io::Result<_>>().unwrap();
    /// assert_eq!(text, "xyz");
    /// ```
    pub fn chars(&mut self) -> Chars<'_> {
        Chars { reader: self }
    }

    /// Called after the ring looked empty. Returns `Ok(true)` at end of
    /// stream and `Ok(false)` when the caller should look again.
    ///
    /// End of stream is latched: after `close` the fill loop may still
    /// publish a chunk it was holding, and that chunk is never read.
    fn exhausted(&mut self) -> io::Result<bool> {
        if !self.closed && self.shared.is_running() {
            self.waiting.idle();
            return Ok(false);
        }

        // The fill loop may have published its last characters after our
        // previous look at `tail`.
        if self.ring.available() > 0 {
            return Ok(false);
        }

        match self.shared.error() {
            Some(err) => Err(err.to_io_error()),
            None => {
                self.finished = true;
                Ok(true)
            }
        }
    }

    /// Stops the fill loop and closes the upstream source.
    ///
    /// Calling `close` again is a no-op. After closing, reads return the
    /// characters already in the ring and then end of stream.
    ///
    /// # Errors
    ///
    /// Returns the error from the source's own `close`, if any.
    pub fn close(&mut self) -> io::Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.shared.request_stop();

        let source = self.upstream.lock().take();
        debug!(consumed = self.ring.position(), "closing reader");
        match source {
            Some(mut source) => source.close(),
            None => Ok(()),
        }
    }

    /// Returns `true` while the fill loop is running.
    #[inline]
    pub fn is_running(&self) -> bool {
        self.shared.is_running()
    }

    /// Returns `true` once [`close`](Self::close) has been called.
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Returns the (rounded) ring buffer capacity.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }
}

impl Drop for ParallelReader {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(error = %e, "failed to close upstream source on drop");
        }
    }
}

impl fmt::Debug for ParallelReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParallelReader")
            .field("capacity", &self.capacity())
            .field("consumed", &self.ring.position())
            .field("running", &self.is_running())
            .field("closed", &self.closed)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

/// Iterator returned by [`ParallelReader::chars`].
#[derive(Debug)]
pub struct Chars<'a> {
    reader: &'a mut ParallelReader,
}

impl Iterator for Chars<'_> {
    type Item = io::Result<char>;

    fn next(&mut self) -> Option<Self::Item> {
        self.reader.read_char().transpose()
    }
}

/// Settings for opening a [`ParallelReader`].
///
/// # Example
///
/// ```
/// use nexus_reader::{ParallelReader, StrSource, ThreadPerTask, Yield};
/// use std::sync::Arc;
///
/// let mut reader = ParallelReader::builder()
///     .ring_buffer_size(100)
///     .read_buffer_size(16)
///     .waiting_strategy(Yield)
///     .scheduler(Arc::new(ThreadPerTask::default()))
///     .open(StrSource::new("configured"))
///     .unwrap();
///
/// assert_eq!(reader.capacity(), 128);
/// let mut text = String::new();
/// reader.read_to_string(&mut text).unwrap();
/// assert_eq!(text, "configured");
/// ```
pub struct Builder {
    ring_buffer_size: usize,
    read_buffer_size: usize,
    waiting: Arc<dyn WaitingStrategy>,
    scheduler: Option<Arc<dyn Scheduler>>,
}

impl Builder {
    /// Creates a builder with default settings.
    pub fn new() -> Self {
        Self {
            ring_buffer_size: DEFAULT_RING_BUFFER_SIZE,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            waiting: Arc::new(ParkNanos),
            scheduler: None,
        }
    }

    /// Requested ring capacity in characters, rounded up to a power of two.
    pub fn ring_buffer_size(mut self, size: usize) -> Self {
        self.ring_buffer_size = size;
        self
    }

    /// Maximum number of characters pulled from upstream per read.
    pub fn read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size;
        self
    }

    /// Strategy used by both sides when they cannot make progress.
    pub fn waiting_strategy<W: WaitingStrategy + 'static>(mut self, waiting: W) -> Self {
        self.waiting = Arc::new(waiting);
        self
    }

    /// Scheduler that runs the fill loop. Defaults to [`default_scheduler`].
    pub fn scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Opens a reader over `source` and starts its fill loop.
    ///
    /// # Errors
    ///
    /// Fails if either buffer size is zero, if the ring buffer size has no
    /// power of two in range, or if the scheduler rejects the fill loop.
    pub fn open<S: CharSource + 'static>(self, source: S) -> Result<ParallelReader, BuildError> {
        if self.ring_buffer_size == 0 {
            return Err(BuildError::ZeroRingBufferSize);
        }
        if self.read_buffer_size == 0 {
            return Err(BuildError::ZeroReadBufferSize);
        }
        if self.ring_buffer_size.checked_next_power_of_two().is_none() {
            return Err(BuildError::RingBufferTooLarge(self.ring_buffer_size));
        }

        let (producer, consumer) = ring_buffer(self.ring_buffer_size);
        let shared = Arc::new(Shared::new());
        let source: Box<dyn CharSource> = Box::new(source);
        let upstream: Upstream = Arc::new(Mutex::new(Some(source)));

        let fill = Fill::new(
            producer,
            Arc::clone(&upstream),
            Arc::clone(&shared),
            Arc::clone(&self.waiting),
            self.read_buffer_size,
        );

        let scheduler = self.scheduler.unwrap_or_else(default_scheduler);
        scheduler
            .execute(Box::new(move || fill.run()))
            .map_err(BuildError::Schedule)?;

        debug!(
            capacity = consumer.capacity(),
            read_buffer_size = self.read_buffer_size,
            "reader opened"
        );

        Ok(ParallelReader {
            ring: consumer,
            shared,
            upstream,
            waiting: self.waiting,
            closed: false,
            finished: false,
        })
    }
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Builder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Builder")
            .field("ring_buffer_size", &self.ring_buffer_size)
            .field("read_buffer_size", &self.read_buffer_size)
            .finish_non_exhaustive()
    }
}
