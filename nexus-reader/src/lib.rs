//! # nexus-reader
//!
//! A character reader that prefetches a slow, blocking source on a
//! background thread.
//!
//! [`ParallelReader`] pairs a consumer-facing read API with a fill loop
//! that pulls chunks from an upstream [`CharSource`] and publishes them
//! into a [`nexus_ring`] SPSC ring buffer. The consumer never touches the
//! upstream source directly: it takes characters from the ring, and only
//! waits when the ring is empty while the fill loop is still running.
//!
//! ```text
//! ┌──────────┐  read_chars  ┌───────────┐  write_from  ┌──────┐  read/pop  ┌────────┐
//! │ upstream │─────────────▶│ fill loop │─────────────▶│ ring │───────────▶│ caller │
//! └──────────┘              └───────────┘   (tail)     └──────┘   (head)   └────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use nexus_reader::{ParallelReader, Utf8Source};
//!
//! let input = "HELLO WORLD".as_bytes();
//! let mut reader = ParallelReader::builder()
//!     .ring_buffer_size(64)
//!     .open(Utf8Source::new(input))
//!     .unwrap();
//!
//! let mut buf = ['\0'; 20];
//! let mut total = 0;
//! loop {
//!     let n = reader.read(&mut buf[total..]).unwrap();
//!     if n == 0 {
//!         break;
//!     }
//!     total += n;
//! }
//! assert_eq!(buf[..total].iter().collect::<String>(), "HELLO WORLD");
//! reader.close().unwrap();
//! ```
//!
//! # Waiting
//!
//! Neither side blocks on an OS primitive. When one side cannot make
//! progress it calls the configured [`WaitingStrategy`]; the default,
//! [`ParkNanos`], parks for the shortest timeout the platform offers.
//! There is no read timeout; wrap the strategy or the call site if one is
//! needed.
//!
//! # Scheduling
//!
//! Fill loops run on a [`Scheduler`]. The default is a process-wide
//! [`WorkerPool`] sized by the available parallelism, or a
//! [`ThreadPerTask`] on single-core machines. A fill loop holds its
//! worker until its stream ends or is closed.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

mod error;
mod fill;
mod reader;
mod scheduler;
mod source;
mod wait;

pub use error::{BuildError, UpstreamError};
pub use reader::{
    Builder, Chars, DEFAULT_READ_BUFFER_SIZE, DEFAULT_RING_BUFFER_SIZE, ParallelReader,
};
pub use scheduler::{Scheduler, Task, ThreadPerTask, WorkerPool, default_scheduler};
pub use source::{CharSource, StrSource, Utf8Source};
pub use wait::{BusySpin, ParkNanos, Sleep, WaitingStrategy, Yield};
