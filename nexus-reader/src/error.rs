//! Error types.

use std::io;
use std::sync::Arc;

use thiserror::Error;

/// An upstream I/O error captured by the fill loop.
///
/// The fill loop stores the error once; every read that reaches it after
/// the buffered characters are drained gets a fresh [`io::Error`] of the
/// same kind carrying this value as its inner error.
///
/// # Example
///
/// ```
/// use std::io;
/// use nexus_reader::UpstreamError;
///
/// let captured = UpstreamError::new(io::Error::new(io::ErrorKind::BrokenPipe, "gone"));
/// let surfaced = captured.to_io_error();
/// assert_eq!(surfaced.kind(), io::ErrorKind::BrokenPipe);
/// assert!(UpstreamError::from_io_error(&surfaced).is_some());
/// ```
#[derive(Debug, Clone, Error)]
#[error("upstream source failed: {source}")]
pub struct UpstreamError {
    source: Arc<io::Error>,
}

impl UpstreamError {
    /// Wraps the original error.
    pub fn new(error: io::Error) -> Self {
        Self {
            source: Arc::new(error),
        }
    }

    /// Returns the original error.
    pub fn get_ref(&self) -> &io::Error {
        &self.source
    }

    /// Returns the kind of the original error.
    pub fn kind(&self) -> io::ErrorKind {
        self.source.kind()
    }

    /// Builds an `io::Error` of the original kind wrapping this error.
    pub fn to_io_error(&self) -> io::Error {
        io::Error::new(self.kind(), self.clone())
    }

    /// Recovers the captured error from an `io::Error` built by
    /// [`to_io_error`](Self::to_io_error).
    pub fn from_io_error(error: &io::Error) -> Option<&Self> {
        error.get_ref()?.downcast_ref::<Self>()
    }
}

/// Error returned when a reader cannot be opened.
#[derive(Debug, Error)]
pub enum BuildError {
    /// The requested ring buffer size was zero.
    #[error("ring buffer size must be non-zero")]
    ZeroRingBufferSize,

    /// The requested ring buffer size rounds past the largest power of two.
    #[error("ring buffer size {0} is too large")]
    RingBufferTooLarge(usize),

    /// The requested upstream read size was zero.
    #[error("read buffer size must be non-zero")]
    ZeroReadBufferSize,

    /// The scheduler rejected the fill loop.
    #[error("failed to schedule fill loop: {0}")]
    Schedule(#[source] io::Error),
}

impl From<BuildError> for io::Error {
    fn from(err: BuildError) -> Self {
        match err {
            BuildError::Schedule(e) => e,
            other => io::Error::new(io::ErrorKind::InvalidInput, other),
        }
    }
}
