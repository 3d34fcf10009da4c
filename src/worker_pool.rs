//! # Worker Pool Module
//!
//! A fixed set of OS threads draining one shared job queue. The connection
//! server hands every accepted socket to the pool; any idle worker picks it up.
//!
//! ## Features
//!
//! - **Shared Queue**: one crossbeam MPMC channel, so idle workers balance load
//!   without a scheduler
//! - **Bounded or Unbounded**: `queue_bound = 0` never rejects; a positive bound
//!   applies the [`BackpressureMode`]
//! - **Sentinel Shutdown**: [`WorkerPool::shutdown`] queues one
//!   [`Job::Shutdown`] per worker behind the pending work, then joins every
//!   thread, so work accepted before shutdown is finished
//! - **Panic Isolation**: a panicking job is logged and the worker keeps going
//! - **Metrics**: queue depth, busy workers, dispatch/shed/completion counts
//!
//! ## Backpressure
//!
//! | Mode | Queue full |
//! |---|---|
//! | `Block` | the dispatcher waits for room |
//! | `Shed` | the item is handed back in [`Rejected`] |

use crossbeam_channel::{bounded, unbounded, Receiver, Sender, TrySendError};
use serde::Serialize;
use std::fmt;
use std::io;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};

/// What a dispatcher does when a bounded queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackpressureMode {
    /// Wait until a worker frees a slot.
    #[default]
    Block,
    /// Reject the item immediately.
    Shed,
}

impl BackpressureMode {
    /// Case-insensitive `block` / `shed`.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "block" => Some(Self::Block),
            "shed" => Some(Self::Shed),
            _ => None,
        }
    }
}

/// Configuration for a worker pool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerPoolConfig {
    /// Number of worker threads
    pub num_workers: usize,
    /// Maximum queued jobs; `0` means unbounded
    pub queue_bound: usize,
    pub backpressure_mode: BackpressureMode,
    /// Thread names are `<prefix>-worker-<n>`
    pub thread_name_prefix: String,
}

impl WorkerPoolConfig {
    #[must_use]
    pub fn new(num_workers: usize, queue_bound: usize, backpressure_mode: BackpressureMode) -> Self {
        Self {
            num_workers,
            queue_bound,
            backpressure_mode,
            ..Self::default()
        }
    }
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            num_workers: 10,
            queue_bound: 0,
            backpressure_mode: BackpressureMode::Block,
            thread_name_prefix: "arbor".to_string(),
        }
    }
}

/// Metrics for a worker pool
#[derive(Debug, Default)]
pub struct WorkerPoolMetrics {
    /// Items rejected because the queue was full
    pub shed_count: AtomicU64,
    /// Items waiting in the queue (approximate)
    pub queue_depth: AtomicUsize,
    /// Workers currently running an item
    pub busy_workers: AtomicUsize,
    /// Total items accepted into the queue
    pub dispatched_count: AtomicU64,
    /// Total items finished, including ones that panicked
    pub completed_count: AtomicU64,
    /// Items whose handler panicked
    pub panic_count: AtomicU64,
}

impl WorkerPoolMetrics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_shed(&self) {
        self.shed_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dispatch(&self) {
        self.dispatched_count.fetch_add(1, Ordering::Relaxed);
        self.queue_depth.fetch_add(1, Ordering::Relaxed);
    }

    /// Undo [`record_dispatch`](Self::record_dispatch) for an item that never
    /// made it into the queue.
    pub fn record_rejected(&self) {
        self.dispatched_count.fetch_sub(1, Ordering::Relaxed);
        self.queue_depth.fetch_sub(1, Ordering::Relaxed);
    }

    /// A worker took an item off the queue.
    pub fn record_start(&self) {
        self.queue_depth.fetch_sub(1, Ordering::Relaxed);
        self.busy_workers.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_completion(&self) {
        self.completed_count.fetch_add(1, Ordering::Relaxed);
        self.busy_workers.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn record_panic(&self) {
        self.panic_count.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn get_shed_count(&self) -> u64 {
        self.shed_count.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn get_queue_depth(&self) -> usize {
        self.queue_depth.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn get_busy_workers(&self) -> usize {
        self.busy_workers.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn get_dispatched_count(&self) -> u64 {
        self.dispatched_count.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn get_completed_count(&self) -> u64 {
        self.completed_count.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn get_panic_count(&self) -> u64 {
        self.panic_count.load(Ordering::Relaxed)
    }
}

/// Queue entry: work, or the signal for one worker to exit.
pub enum Job<T> {
    Work(T),
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Bounded queue full in [`BackpressureMode::Shed`].
    Shed,
    /// Every worker has exited.
    Disconnected,
}

/// An item the pool refused, handed back to the caller.
pub struct Rejected<T> {
    pub item: T,
    pub reason: RejectReason,
}

impl<T> fmt::Debug for Rejected<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rejected")
            .field("reason", &self.reason)
            .finish_non_exhaustive()
    }
}

/// Fixed-size pool of threads consuming items of type `T`.
pub struct WorkerPool<T: Send + 'static> {
    config: WorkerPoolConfig,
    sender: Sender<Job<T>>,
    workers: Vec<JoinHandle<()>>,
    metrics: Arc<WorkerPoolMetrics>,
}

impl<T: Send + 'static> WorkerPool<T> {
    /// Spawn `config.num_workers` threads running `handler` on each item.
    ///
    /// # Errors
    ///
    /// The OS error when a thread cannot be spawned; workers already
    /// started are shut down first.
    pub fn new<F>(config: WorkerPoolConfig, handler: F) -> io::Result<Self>
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        let (sender, receiver) = if config.queue_bound == 0 {
            unbounded()
        } else {
            bounded(config.queue_bound)
        };
        let metrics = Arc::new(WorkerPoolMetrics::new());
        let handler = Arc::new(handler);

        info!(
            num_workers = config.num_workers,
            queue_bound = config.queue_bound,
            backpressure_mode = ?config.backpressure_mode,
            "Creating worker pool"
        );

        let mut pool = Self {
            config,
            sender,
            workers: Vec::new(),
            metrics,
        };
        for worker_id in 0..pool.config.num_workers {
            let receiver = receiver.clone();
            let handler = Arc::clone(&handler);
            let metrics = Arc::clone(&pool.metrics);
            let spawned = thread::Builder::new()
                .name(format!("{}-worker-{worker_id}", pool.config.thread_name_prefix))
                .spawn(move || worker_loop(worker_id, &receiver, handler.as_ref(), &metrics));
            match spawned {
                Ok(handle) => pool.workers.push(handle),
                Err(e) => {
                    error!(worker_id, error = %e, "Failed to spawn worker thread");
                    pool.shutdown();
                    return Err(e);
                }
            }
        }
        Ok(pool)
    }

    /// Queue `item` for the next free worker.
    ///
    /// # Errors
    ///
    /// [`Rejected`] with the item when the bounded queue is full in shed
    /// mode, or when no worker is left to receive it.
    pub fn dispatch(&self, item: T) -> Result<(), Rejected<T>> {
        // counted up front so a fast worker never sees a negative depth
        self.metrics.record_dispatch();
        let sent = match self.config.backpressure_mode {
            BackpressureMode::Block => self.sender.send(Job::Work(item)).map_err(|e| {
                (e.into_inner(), RejectReason::Disconnected)
            }),
            BackpressureMode::Shed => self.sender.try_send(Job::Work(item)).map_err(|e| match e {
                TrySendError::Full(job) => (job, RejectReason::Shed),
                TrySendError::Disconnected(job) => (job, RejectReason::Disconnected),
            }),
        };
        match sent {
            Ok(()) => Ok(()),
            Err((Job::Work(item), reason)) => {
                self.metrics.record_rejected();
                match reason {
                    RejectReason::Shed => {
                        self.metrics.record_shed();
                        warn!(
                            queue_bound = self.config.queue_bound,
                            shed_count = self.metrics.get_shed_count(),
                            "Queue full, shedding"
                        );
                    }
                    RejectReason::Disconnected => {
                        error!("Worker pool channel disconnected");
                    }
                }
                Err(Rejected { item, reason })
            }
            // only Work items are sent above
            Err((Job::Shutdown, _)) => Ok(()),
        }
    }

    /// Queue one sentinel per worker and join them all.
    ///
    /// Items queued before the call are processed first. Returns how many
    /// workers ended by panicking.
    pub fn shutdown(&mut self) -> usize {
        if self.workers.is_empty() {
            return 0;
        }
        debug!(num_workers = self.workers.len(), "Stopping worker pool");
        for _ in 0..self.workers.len() {
            if self.sender.send(Job::Shutdown).is_err() {
                break;
            }
        }
        let mut panicked = 0;
        for handle in self.workers.drain(..) {
            let name = handle.thread().name().unwrap_or("worker").to_string();
            if handle.join().is_err() {
                error!(thread = %name, "Worker thread panicked");
                panicked += 1;
            }
        }
        info!(panicked, "Worker pool stopped");
        panicked
    }

    #[must_use]
    pub fn metrics(&self) -> &Arc<WorkerPoolMetrics> {
        &self.metrics
    }

    #[must_use]
    pub fn config(&self) -> &WorkerPoolConfig {
        &self.config
    }

    /// Workers still running.
    #[must_use]
    pub fn len(&self) -> usize {
        self.workers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }
}

impl<T: Send + 'static> Drop for WorkerPool<T> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop<T>(
    worker_id: usize,
    receiver: &Receiver<Job<T>>,
    handler: &(dyn Fn(T) + Send + Sync),
    metrics: &WorkerPoolMetrics,
) {
    debug!(worker_id, "Worker started");
    loop {
        match receiver.recv() {
            Ok(Job::Work(item)) => {
                metrics.record_start();
                if let Err(panic) = catch_unwind(AssertUnwindSafe(|| handler(item))) {
                    metrics.record_panic();
                    error!(
                        worker_id,
                        panic = %crate::error::panic_message(panic.as_ref()),
                        "Job panicked"
                    );
                }
                metrics.record_completion();
            }
            Ok(Job::Shutdown) | Err(_) => break,
        }
    }
    debug!(worker_id, "Worker exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::RecvTimeoutError;
    use std::sync::Mutex;
    use std::time::Duration;

    #[test]
    fn test_backpressure_mode_parse() {
        assert_eq!(BackpressureMode::parse("block"), Some(BackpressureMode::Block));
        assert_eq!(BackpressureMode::parse("BLOCK"), Some(BackpressureMode::Block));
        assert_eq!(BackpressureMode::parse(" Shed "), Some(BackpressureMode::Shed));
        assert_eq!(BackpressureMode::parse("invalid"), None);
    }

    #[test]
    fn test_worker_pool_config_default() {
        let config = WorkerPoolConfig::default();
        assert_eq!(config.num_workers, 10);
        assert_eq!(config.queue_bound, 0);
        assert_eq!(config.backpressure_mode, BackpressureMode::Block);
    }

    #[test]
    fn test_worker_pool_metrics() {
        let metrics = WorkerPoolMetrics::new();
        metrics.record_dispatch();
        assert_eq!(metrics.get_dispatched_count(), 1);
        assert_eq!(metrics.get_queue_depth(), 1);

        metrics.record_start();
        assert_eq!(metrics.get_queue_depth(), 0);
        assert_eq!(metrics.get_busy_workers(), 1);

        metrics.record_completion();
        assert_eq!(metrics.get_completed_count(), 1);
        assert_eq!(metrics.get_busy_workers(), 0);

        metrics.record_shed();
        assert_eq!(metrics.get_shed_count(), 1);
    }

    #[test]
    fn test_processes_every_item_before_shutdown() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let mut pool = WorkerPool::new(WorkerPoolConfig::new(3, 0, BackpressureMode::Block), move |n: u32| {
            std::thread::sleep(Duration::from_millis(5));
            sink.lock().unwrap().push(n);
        })
        .unwrap();
        for n in 0..20 {
            pool.dispatch(n).unwrap();
        }
        assert_eq!(pool.shutdown(), 0);
        let mut seen = seen.lock().unwrap().clone();
        seen.sort_unstable();
        assert_eq!(seen, (0..20).collect::<Vec<_>>());
        assert_eq!(pool.metrics().get_completed_count(), 20);
        assert!(pool.is_empty());
    }

    #[test]
    fn test_shed_mode_hands_item_back_when_full() {
        let (started_tx, started_rx) = crossbeam_channel::unbounded();
        let (release_tx, release_rx) = crossbeam_channel::unbounded::<()>();
        let mut pool = WorkerPool::new(WorkerPoolConfig::new(1, 1, BackpressureMode::Shed), move |n: u32| {
            started_tx.send(n).unwrap();
            let _ = release_rx.recv_timeout(Duration::from_secs(5));
        })
        .unwrap();

        pool.dispatch(1).unwrap();
        assert_eq!(started_rx.recv_timeout(Duration::from_secs(5)), Ok(1));
        pool.dispatch(2).unwrap();
        let rejected = pool.dispatch(3).unwrap_err();
        assert_eq!(rejected.item, 3);
        assert_eq!(rejected.reason, RejectReason::Shed);
        assert_eq!(pool.metrics().get_shed_count(), 1);

        release_tx.send(()).unwrap();
        release_tx.send(()).unwrap();
        pool.shutdown();
        assert_eq!(
            started_rx.recv_timeout(Duration::from_millis(10)),
            Ok(2)
        );
        assert_eq!(
            started_rx.recv_timeout(Duration::from_millis(10)),
            Err(RecvTimeoutError::Disconnected)
        );
    }

    #[test]
    fn test_panicking_job_does_not_kill_worker() {
        let done = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&done);
        let mut pool = WorkerPool::new(WorkerPoolConfig::new(1, 0, BackpressureMode::Block), move |n: u32| {
            assert!(n != 0, "zero is not allowed");
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        pool.dispatch(0).unwrap();
        pool.dispatch(1).unwrap();
        assert_eq!(pool.shutdown(), 0);
        assert_eq!(done.load(Ordering::SeqCst), 1);
        assert_eq!(pool.metrics().get_panic_count(), 1);
        assert_eq!(pool.metrics().get_completed_count(), 2);
    }

    #[test]
    fn test_threads_are_named() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut pool = WorkerPool::new(WorkerPoolConfig::new(1, 0, BackpressureMode::Block), move |(): ()| {
            tx.send(std::thread::current().name().map(str::to_string)).unwrap();
        })
        .unwrap();
        pool.dispatch(()).unwrap();
        pool.shutdown();
        assert_eq!(rx.recv().unwrap().as_deref(), Some("arbor-worker-0"));
    }
}
