//! Execution of fill loops.
//!
//! A [`Scheduler`] runs each reader's fill loop once, asynchronously, until
//! it returns. The fill loop occupies its thread for the whole life of the
//! stream, so a [`WorkerPool`] of `n` threads serves at most `n` live
//! readers at a time; further loops queue until a worker frees up.

use std::io;
use std::num::NonZeroUsize;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, OnceLock};
use std::thread;

use crossbeam_channel::{Sender, unbounded};
use tracing::{debug, error, warn};

/// A unit of work handed to a [`Scheduler`].
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Upper bound on the size of the default pool.
const MAX_DEFAULT_WORKERS: usize = 0x7fff;

/// Runs a task asynchronously, once.
pub trait Scheduler: Send + Sync {
    /// Schedules `task`. Returns an error if the task could not be
    /// accepted; the task is dropped without running in that case.
    fn execute(&self, task: Task) -> io::Result<()>;
}

/// Spawns a dedicated, named thread for every task.
#[derive(Debug, Clone)]
pub struct ThreadPerTask {
    name: String,
}

impl ThreadPerTask {
    /// Creates a scheduler whose threads are named `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Default for ThreadPerTask {
    fn default() -> Self {
        Self::new("nexus-reader")
    }
}

impl Scheduler for ThreadPerTask {
    fn execute(&self, task: Task) -> io::Result<()> {
        thread::Builder::new().name(self.name.clone()).spawn(task)?;
        Ok(())
    }
}

/// Fixed pool of worker threads fed from an unbounded queue.
///
/// Workers exit once the pool is dropped and the queue drains. A task that
/// panics is logged and does not take its worker down.
#[derive(Debug)]
pub struct WorkerPool {
    sender: Sender<Task>,
    size: usize,
}

impl WorkerPool {
    /// Starts `size` workers (at least one).
    pub fn new(size: usize) -> io::Result<Self> {
        let size = size.max(1);
        let (sender, receiver) = unbounded::<Task>();

        for id in 0..size {
            let receiver = receiver.clone();
            thread::Builder::new()
                .name(format!("nexus-reader-{id}"))
                .spawn(move || {
                    debug!(worker = id, "worker started");
                    while let Ok(task) = receiver.recv() {
                        if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
                            error!(worker = id, "task panicked");
                        }
                    }
                    debug!(worker = id, "worker stopped");
                })?;
        }

        Ok(Self { sender, size })
    }

    /// Number of worker threads.
    pub fn size(&self) -> usize {
        self.size
    }
}

impl Scheduler for WorkerPool {
    fn execute(&self, task: Task) -> io::Result<()> {
        self.sender
            .send(task)
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "worker pool has shut down"))
    }
}

/// Returns the process-wide default scheduler.
///
/// A shared [`WorkerPool`] sized by the available parallelism when more
/// than one core is available, otherwise a [`ThreadPerTask`].
pub fn default_scheduler() -> Arc<dyn Scheduler> {
    static DEFAULT: OnceLock<Arc<dyn Scheduler>> = OnceLock::new();

    Arc::clone(DEFAULT.get_or_init(|| {
        let parallelism = thread::available_parallelism().map_or(1, NonZeroUsize::get);
        select_scheduler(parallelism)
    }))
}

fn select_scheduler(parallelism: usize) -> Arc<dyn Scheduler> {
    if parallelism <= 1 {
        return Arc::new(ThreadPerTask::default());
    }

    match WorkerPool::new(parallelism.min(MAX_DEFAULT_WORKERS)) {
        Ok(pool) => Arc::new(pool),
        Err(e) => {
            warn!(error = %e, "failed to start worker pool, falling back to thread per task");
            Arc::new(ThreadPerTask::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn run_all(scheduler: &dyn Scheduler, tasks: usize) -> usize {
        let (tx, rx) = crossbeam_channel::bounded(tasks);
        for i in 0..tasks {
            let tx = tx.clone();
            scheduler
                .execute(Box::new(move || tx.send(i).unwrap()))
                .unwrap();
        }
        let mut seen = 0;
        for _ in 0..tasks {
            rx.recv_timeout(Duration::from_secs(5)).unwrap();
            seen += 1;
        }
        seen
    }

    #[test]
    fn thread_per_task_runs_every_task() {
        assert_eq!(run_all(&ThreadPerTask::default(), 8), 8);
    }

    #[test]
    fn thread_per_task_names_threads() {
        let (tx, rx) = crossbeam_channel::bounded(1);
        ThreadPerTask::new("fill-test")
            .execute(Box::new(move || {
                tx.send(thread::current().name().map(str::to_owned)).unwrap();
            }))
            .unwrap();
        assert_eq!(rx.recv().unwrap().as_deref(), Some("fill-test"));
    }

    #[test]
    fn worker_pool_runs_every_task() {
        let pool = WorkerPool::new(3).unwrap();
        assert_eq!(pool.size(), 3);
        assert_eq!(run_all(&pool, 32), 32);
    }

    #[test]
    fn worker_pool_survives_panicking_task() {
        let pool = WorkerPool::new(1).unwrap();
        let ran = Arc::new(AtomicUsize::new(0));

        pool.execute(Box::new(|| panic!("boom"))).unwrap();
        let counter = Arc::clone(&ran);
        let (tx, rx) = crossbeam_channel::bounded(1);
        pool.execute(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            tx.send(()).unwrap();
        }))
        .unwrap();

        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn zero_sized_pool_gets_one_worker() {
        let pool = WorkerPool::new(0).unwrap();
        assert_eq!(pool.size(), 1);
        assert_eq!(run_all(&pool, 4), 4);
    }

    #[test]
    fn single_core_selects_thread_per_task() {
        let scheduler = select_scheduler(1);
        assert_eq!(run_all(scheduler.as_ref(), 2), 2);
    }

    #[test]
    fn default_scheduler_is_shared() {
        let a = default_scheduler();
        let b = default_scheduler();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(run_all(a.as_ref(), 4), 4);
    }
}
