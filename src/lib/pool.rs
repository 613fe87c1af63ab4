//! Worker pool for formatter tasks.
//!
//! A minimal submit-and-run pool: tasks go into a crossbeam channel and any
//! free worker thread picks them up. The pool applies no admission control of
//! its own; back-pressure comes from the processing-unit ring upstream, which
//! never has more tasks in flight than it has units.
//!
//! Observability counters live in an injected [`PoolMetrics`] rather than
//! pool-internal globals, so a host process can aggregate them across pools.

use crossbeam_channel::{Receiver, Sender};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};

/// A unit of work executed on some pool thread.
pub type Task = Box<dyn FnOnce() + Send>;

/// Process-level counters for pool instrumentation.
#[derive(Debug, Default)]
pub struct PoolMetrics {
    scheduled: AtomicU64,
    active: AtomicUsize,
    peak_active: AtomicUsize,
}

impl PoolMetrics {
    /// Create zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Total tasks ever submitted.
    #[must_use]
    pub fn scheduled(&self) -> u64 {
        self.scheduled.load(Ordering::Relaxed)
    }

    /// Tasks currently executing.
    #[must_use]
    pub fn active(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    /// Highest number of tasks ever executing at once.
    #[must_use]
    pub fn peak_active(&self) -> usize {
        self.peak_active.load(Ordering::Relaxed)
    }

    fn task_scheduled(&self) {
        self.scheduled.fetch_add(1, Ordering::Relaxed);
    }

    fn task_started(&self) {
        let now_active = self.active.fetch_add(1, Ordering::Relaxed) + 1;
        let mut peak = self.peak_active.load(Ordering::Relaxed);
        while now_active > peak {
            match self.peak_active.compare_exchange_weak(
                peak,
                now_active,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(actual) => peak = actual,
            }
        }
    }

    fn task_finished(&self) {
        self.active.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Fixed-size pool of worker threads consuming tasks from a shared queue.
///
/// Dropping the pool (or calling [`WorkerPool::join`]) closes the queue,
/// lets queued tasks finish, and joins every thread.
pub struct WorkerPool {
    sender: Option<Sender<Task>>,
    handles: Vec<JoinHandle<()>>,
    metrics: Arc<PoolMetrics>,
}

impl WorkerPool {
    /// Spawn `num_threads` workers named `{name}-{index}`.
    #[must_use]
    pub fn new(name: &str, num_threads: usize, metrics: Arc<PoolMetrics>) -> Self {
        let num_threads = num_threads.max(1);
        let (sender, receiver) = crossbeam_channel::unbounded::<Task>();

        let mut handles = Vec::with_capacity(num_threads);
        for index in 0..num_threads {
            let receiver: Receiver<Task> = receiver.clone();
            let metrics = Arc::clone(&metrics);
            let handle = thread::Builder::new()
                .name(format!("{name}-{index}"))
                .spawn(move || {
                    for task in &receiver {
                        metrics.task_started();
                        task();
                        metrics.task_finished();
                    }
                })
                .unwrap_or_else(|e| panic!("failed to spawn pool thread {name}-{index}: {e}"));
            handles.push(handle);
        }

        log::debug!("worker pool '{name}' started with {num_threads} threads");
        Self { sender: Some(sender), handles, metrics }
    }

    /// Submit a task. Runs later on any free worker.
    ///
    /// Submissions after [`WorkerPool::join`] are dropped; the ring protocol
    /// never submits once teardown has begun.
    pub fn execute(&self, task: Task) {
        if let Some(sender) = &self.sender {
            self.metrics.task_scheduled();
            // Send only fails if all workers are gone, which join() handles.
            let _ = sender.send(task);
        } else {
            debug_assert!(false, "task submitted to a joined pool");
        }
    }

    /// The injected metrics counters.
    #[must_use]
    pub fn metrics(&self) -> &Arc<PoolMetrics> {
        &self.metrics
    }

    /// Close the queue, run out remaining tasks, and join all threads.
    /// Idempotent.
    pub fn join(&mut self) {
        // Dropping the sender disconnects the channel; workers exit once the
        // queue drains.
        self.sender.take();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.join();
    }
}
