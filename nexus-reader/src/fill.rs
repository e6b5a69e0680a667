//! Background fill loop.
//!
//! The fill loop owns the producer half of the ring. Each iteration:
//!
//! 1. Stops if the reader asked it to.
//! 2. Idles if the ring has no free slot (backpressure).
//! 3. Refills its local chunk from upstream if the chunk is used up.
//!    End of data or an upstream error ends the loop.
//! 4. Copies as much of the chunk as fits in the ring's contiguous free run
//!    and publishes it by advancing `tail`.
//!
//! ```text
//!             ┌─────────┐  stop requested   ┌──────────────┐
//!             │ RUNNING │──────────────────▶│   STOPPED    │
//!             └─────────┘  end of data      │ (clean)      │
//!                  │      ─────────────────▶└──────────────┘
//!                  │ upstream error         ┌──────────────┐
//!                  └───────────────────────▶│   STOPPED    │
//!                                           │ (error kept) │
//!                                           └──────────────┘
//! ```
//!
//! No state leaves `STOPPED`.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread;

use crossbeam_utils::CachePadded;
use nexus_ring::Producer;
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::error::UpstreamError;
use crate::source::CharSource;
use crate::wait::WaitingStrategy;

/// The upstream source, shared so the reader can close it.
///
/// `None` once the reader has closed it. The fill loop holds the lock only
/// for the duration of a single chunk read.
pub(crate) type Upstream = Arc<Mutex<Option<Box<dyn CharSource>>>>;

/// Termination state shared between the fill loop and the reader.
pub(crate) struct Shared {
    /// Set by the reader to ask the fill loop to stop.
    stop: CachePadded<AtomicBool>,
    /// Cleared once, by the fill loop, when it exits.
    running: CachePadded<AtomicBool>,
    /// Written at most once, before `running` is cleared.
    error: OnceLock<UpstreamError>,
}

impl Shared {
    pub(crate) fn new() -> Self {
        Self {
            stop: CachePadded::new(AtomicBool::new(false)),
            running: CachePadded::new(AtomicBool::new(true)),
            error: OnceLock::new(),
        }
    }

    #[inline]
    pub(crate) fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    #[inline]
    fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// The captured upstream error. Only meaningful once `is_running`
    /// has returned `false`.
    #[inline]
    pub(crate) fn error(&self) -> Option<&UpstreamError> {
        self.error.get()
    }
}

/// Why a fill step did not publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Published(usize),
    EndOfData,
    /// The reader closed the upstream source.
    Detached,
}

/// Producer side of a reader: ring producer plus the local chunk cache.
pub(crate) struct Fill {
    ring: Producer,
    upstream: Upstream,
    shared: Arc<Shared>,
    waiting: Arc<dyn WaitingStrategy>,
    chunk: Box<[char]>,
    /// Next unpublished character in `chunk`.
    offset: usize,
    /// Number of valid characters in `chunk`.
    size: usize,
}

impl Fill {
    pub(crate) fn new(
        ring: Producer,
        upstream: Upstream,
        shared: Arc<Shared>,
        waiting: Arc<dyn WaitingStrategy>,
        read_buffer_size: usize,
    ) -> Self {
        assert!(read_buffer_size > 0, "read buffer size must be non-zero");

        Self {
            ring,
            upstream,
            shared,
            waiting,
            chunk: vec!['\0'; read_buffer_size].into_boxed_slice(),
            offset: 0,
            size: 0,
        }
    }

    /// Runs until end of data, an upstream error, or a stop request.
    pub(crate) fn run(mut self) {
        let _running = RunningGuard {
            shared: Arc::clone(&self.shared),
        };
        debug!(
            capacity = self.ring.capacity(),
            tail_padding = self.ring.tail_padding(),
            chunk = self.chunk.len(),
            "fill loop started"
        );

        while !self.shared.stop_requested() {
            if self.ring.free_len() == 0 {
                self.waiting.idle();
                continue;
            }

            match self.step() {
                Ok(Step::Published(n)) => trace!(published = n, tail = self.ring.position()),
                Ok(Step::EndOfData) => {
                    debug!(total = self.ring.position(), "upstream exhausted");
                    return;
                }
                Ok(Step::Detached) => {
                    debug!(total = self.ring.position(), "upstream closed by reader");
                    return;
                }
                Err(e) => {
                    warn!(error = %e, total = self.ring.position(), "upstream read failed");
                    let _ = self.shared.error.set(UpstreamError::new(e));
                    return;
                }
            }
        }

        debug!(total = self.ring.position(), "fill loop stopped on request");
    }

    /// One fill iteration, called only when the ring has free space.
    fn step(&mut self) -> io::Result<Step> {
        if self.offset >= self.size {
            match self.pull()? {
                None => return Ok(Step::Detached),
                Some(0) => return Ok(Step::EndOfData),
                Some(n) => {
                    self.size = n;
                    self.offset = 0;
                }
            }
        }

        let n = self.ring.write_from(&self.chunk[self.offset..self.size]);
        self.offset += n;
        Ok(Step::Published(n))
    }

    /// Reads the next chunk from upstream, or `None` if it was closed.
    fn pull(&mut self) -> io::Result<Option<usize>> {
        let mut upstream = self.upstream.lock();
        let Some(source) = upstream.as_mut() else {
            return Ok(None);
        };

        loop {
            match source.read_chars(&mut self.chunk) {
                Ok(n) => return Ok(Some(n)),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }
}

/// Clears `running` when the fill loop exits, including by panic.
struct RunningGuard {
    shared: Arc<Shared>,
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        if thread::panicking() {
            let _ = self
                .shared
                .error
                .set(UpstreamError::new(io::Error::other("fill loop panicked")));
        }
        self.shared.running.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::StrSource;
    use crate::wait::BusySpin;
    use std::collections::VecDeque;

    /// Replays scripted read results, one per call.
    struct Script(VecDeque<io::Result<&'static str>>);

    impl CharSource for Script {
        fn read_chars(&mut self, buf: &mut [char]) -> io::Result<usize> {
            match self.0.pop_front() {
                None => Ok(0),
                Some(Err(e)) => Err(e),
                Some(Ok(text)) => {
                    let chars: Vec<char> = text.chars().collect();
                    assert!(chars.len() <= buf.len());
                    buf[..chars.len()].copy_from_slice(&chars);
                    Ok(chars.len())
                }
            }
        }
    }

    fn fill_with(
        capacity: usize,
        chunk: usize,
        source: impl CharSource + 'static,
    ) -> (Fill, nexus_ring::Consumer, Arc<Shared>, Upstream) {
        let (producer, consumer) = nexus_ring::ring_buffer(capacity);
        let shared = Arc::new(Shared::new());
        let source: Box<dyn CharSource> = Box::new(source);
        let upstream: Upstream = Arc::new(Mutex::new(Some(source)));
        let fill = Fill::new(
            producer,
            Arc::clone(&upstream),
            Arc::clone(&shared),
            Arc::new(BusySpin),
            chunk,
        );
        (fill, consumer, shared, upstream)
    }

    fn drain(consumer: &mut nexus_ring::Consumer) -> String {
        let mut out = String::new();
        while let Some(c) = consumer.pop() {
            out.push(c);
        }
        out
    }

    // ============================================================================
    // Termination
    // ============================================================================

    #[test]
    fn runs_to_end_of_data() {
        let (fill, mut consumer, shared, _) = fill_with(64, 4, StrSource::new("HELLO WORLD"));

        fill.run();
        assert!(!shared.is_running());
        assert!(shared.error().is_none());
        assert_eq!(drain(&mut consumer), "HELLO WORLD");
    }

    #[test]
    fn captures_error_after_published_data() {
        let script = Script(VecDeque::from([
            Ok("abc"),
            Ok("de"),
            Err(io::Error::new(io::ErrorKind::UnexpectedEof, "cut")),
            Ok("never"),
        ]));
        let (fill, mut consumer, shared, _) = fill_with(64, 8, script);

        fill.run();
        assert!(!shared.is_running());
        assert_eq!(shared.error().unwrap().kind(), io::ErrorKind::UnexpectedEof);
        assert_eq!(drain(&mut consumer), "abcde");
    }

    #[test]
    fn retries_interrupted_reads() {
        let script = Script(VecDeque::from([
            Ok("ab"),
            Err(io::Error::new(io::ErrorKind::Interrupted, "signal")),
            Ok("cd"),
        ]));
        let (fill, mut consumer, shared, _) = fill_with(16, 8, script);

        fill.run();
        assert!(shared.error().is_none());
        assert_eq!(drain(&mut consumer), "abcd");
    }

    #[test]
    fn stops_when_requested() {
        let (fill, _consumer, shared, _) = fill_with(8, 8, StrSource::new("abc"));

        shared.request_stop();
        fill.run();
        assert!(!shared.is_running());
        assert!(shared.error().is_none());
    }

    #[test]
    fn stops_when_upstream_detached() {
        let (fill, mut consumer, shared, upstream) = fill_with(8, 8, StrSource::new("abc"));

        upstream.lock().take();
        fill.run();
        assert!(!shared.is_running());
        assert!(shared.error().is_none());
        assert_eq!(consumer.pop(), None);
    }

    // ============================================================================
    // Backpressure
    // ============================================================================

    #[test]
    fn waits_for_consumer_when_full() {
        let text: String = "0123456789".repeat(50);
        let (fill, mut consumer, shared, _) = fill_with(16, 7, StrSource::new(&text));
        let limit = consumer.capacity();

        let handle = thread::spawn(move || fill.run());

        let mut out = String::new();
        while out.len() < text.len() {
            assert!(consumer.len() <= limit);
            match consumer.pop() {
                Some(c) => out.push(c),
                None => std::hint::spin_loop(),
            }
        }

        handle.join().unwrap();
        assert!(!shared.is_running());
        assert_eq!(out, text);
    }

    #[test]
    fn panic_in_source_is_captured() {
        struct Explodes;
        impl CharSource for Explodes {
            fn read_chars(&mut self, _buf: &mut [char]) -> io::Result<usize> {
                panic!("source exploded");
            }
        }

        let (fill, _consumer, shared, _) = fill_with(8, 8, Explodes);
        let result = thread::spawn(move || fill.run()).join();

        assert!(result.is_err());
        assert!(!shared.is_running());
        assert_eq!(shared.error().unwrap().kind(), io::ErrorKind::Other);
    }
}
