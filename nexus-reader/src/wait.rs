//! Idle strategies for the producer and consumer sides.
//!
//! Both sides of a [`ParallelReader`](crate::ParallelReader) call
//! [`WaitingStrategy::idle`] whenever they cannot make progress: the fill
//! loop when the ring is full, the reader when the ring is empty and the
//! fill loop is still running. Neither side ever blocks on an OS
//! primitive waiting for the other.

use std::fmt;
use std::hint;
use std::thread;
use std::time::Duration;

/// Backoff invoked by a side that cannot make progress.
///
/// Implemented for any `Fn() + Send + Sync` closure:
///
/// ```
/// use nexus_reader::{ParallelReader, StrSource};
///
/// let reader = ParallelReader::builder()
///     .waiting_strategy(|| std::thread::yield_now())
///     .open(StrSource::new("abc"))
///     .unwrap();
/// # drop(reader);
/// ```
pub trait WaitingStrategy: Send + Sync {
    /// Pauses briefly before the caller retries.
    fn idle(&self);
}

impl<F> WaitingStrategy for F
where
    F: Fn() + Send + Sync,
{
    #[inline]
    fn idle(&self) {
        self()
    }
}

/// Parks the thread for the shortest timeout the platform supports.
///
/// This is the default strategy. It hands the core back to the scheduler
/// for roughly one timer slice, bounding CPU burn while keeping wake-up
/// latency low.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParkNanos;

impl WaitingStrategy for ParkNanos {
    #[inline]
    fn idle(&self) {
        thread::park_timeout(Duration::from_nanos(1));
    }
}

/// Spins on the CPU without giving up the core.
///
/// Lowest latency, one full core burned per waiting side.
#[derive(Debug, Clone, Copy, Default)]
pub struct BusySpin;

impl WaitingStrategy for BusySpin {
    #[inline]
    fn idle(&self) {
        hint::spin_loop();
    }
}

/// Yields the rest of the time slice to the OS scheduler.
#[derive(Debug, Clone, Copy, Default)]
pub struct Yield;

impl WaitingStrategy for Yield {
    #[inline]
    fn idle(&self) {
        thread::yield_now();
    }
}

/// Sleeps for a fixed duration.
#[derive(Clone, Copy)]
pub struct Sleep(pub Duration);

impl WaitingStrategy for Sleep {
    #[inline]
    fn idle(&self) {
        thread::sleep(self.0);
    }
}

impl fmt::Debug for Sleep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Sleep").field(&self.0).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    #[test]
    fn closure_strategy_is_invoked() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let strategy: Arc<dyn WaitingStrategy> = Arc::new(move || {
            counter.fetch_add(1, Ordering::Relaxed);
        });

        strategy.idle();
        strategy.idle();
        assert_eq!(calls.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn builtin_strategies_return() {
        let strategies: [Box<dyn WaitingStrategy>; 4] = [
            Box::new(ParkNanos),
            Box::new(BusySpin),
            Box::new(Yield),
            Box::new(Sleep(Duration::from_micros(1))),
        ];
        for strategy in &strategies {
            strategy.idle();
        }
    }

    #[test]
    fn sleep_waits_at_least_duration() {
        let start = Instant::now();
        Sleep(Duration::from_millis(5)).idle();
        assert!(start.elapsed() >= Duration::from_millis(5));
    }
}
