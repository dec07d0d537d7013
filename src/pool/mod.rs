//! Elastic worker pool with a bounded submission queue.
//!
//! Workers are tokio tasks pulling jobs off a shared bounded channel. The
//! pool keeps at least `min` workers alive, grows up to `max` when a
//! submission arrives while every worker is busy, and lets workers idle
//! longer than `keep_alive` retire themselves back down to `min`. A monitor
//! task fires every `monitoring_period` to log utilisation and replace dead
//! workers below the minimum.
//!
//! # Submission contract
//!
//! [`WorkerPool::submit`] distinguishes three outcomes the poller reacts to
//! differently:
//!
//! - `Ok(true)`: the job was enqueued (or handed straight to an idle worker).
//! - `Ok(false)`: the queue is full but the pool is healthy; the caller must
//!   release the message for immediate redelivery.
//! - `Err(PoolError::Stopped)`: the pool is not running; the caller must
//!   release the whole remaining batch.
//!
//! [`WorkerPool::available_workers`] is a hint, not a reservation: the count
//! can be stale by the time the caller acts on it.

use std::fmt;
use std::future::Future;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicU8, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Mutex as TokioMutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::config::PoolConf;

/// Errors from pool submission.
#[derive(Debug, Error)]
pub enum PoolError {
    /// The pool has not been started, or has been stopped.
    #[error("worker pool is not running")]
    Stopped,
}

/// A unit of work the pool can execute.
///
/// Jobs are consumed by execution; the pool logs the outcome and moves on.
pub trait PoolJob: Send + 'static {
    /// The error type reported when processing fails.
    type Error: fmt::Display + Send;

    /// Correlation id for logging.
    fn id(&self) -> String;

    /// Executes the job to completion.
    fn process(self) -> impl Future<Output = Result<(), Self::Error>> + Send;
}

/// The pool capability the poller is written against.
///
/// [`ElasticPool`] is the production implementation; tests script submission
/// outcomes through a mock.
pub trait WorkerPool<J>: Send + Sync + 'static {
    /// Starts the pool. Idempotent.
    fn start(&self);

    /// Stops the pool, draining in-flight jobs for up to `drain_timeout`
    /// and abandoning workers still running after that. Idempotent.
    fn stop(&self, drain_timeout: Duration) -> impl Future<Output = ()> + Send;

    /// Submits a job; see the module docs for the outcome contract.
    fn submit(&self, job: J) -> Result<bool, PoolError>;

    /// Upper bound on how many jobs the caller should fetch right now:
    /// `max(0, max_workers - busy) + free_queue_slots`.
    fn available_workers(&self) -> i64;
}

/// Pool lifecycle: created, then running, then stopped. Single-use.
const STATE_NEW: u8 = 0;
const STATE_RUNNING: u8 = 1;
const STATE_STOPPED: u8 = 2;

struct PoolInner<J> {
    conf: PoolConf,

    /// Actual channel capacity (`queue_size` floored at 1).
    queue_capacity: usize,

    /// Submission side; dropped on stop to let workers drain and exit.
    tx: StdMutex<Option<mpsc::Sender<J>>>,

    /// Receive side, shared by all workers.
    rx: TokioMutex<mpsc::Receiver<J>>,

    state: AtomicU8,
    current_workers: AtomicU32,
    busy_workers: AtomicU32,
    next_worker_id: AtomicU64,

    /// Handles of spawned workers, pruned by the monitor.
    handles: StdMutex<Vec<JoinHandle<()>>>,

    monitor: StdMutex<Option<JoinHandle<()>>>,

    /// Stops the monitor task.
    shutdown: CancellationToken,
}

/// The production worker pool.
pub struct ElasticPool<J> {
    inner: Arc<PoolInner<J>>,
}

impl<J> Clone for ElasticPool<J> {
    fn clone(&self) -> Self {
        ElasticPool {
            inner: self.inner.clone(),
        }
    }
}

impl<J: PoolJob> ElasticPool<J> {
    /// Creates a stopped pool with the given tuning.
    pub fn new(conf: PoolConf) -> Self {
        let queue_capacity = conf.queue_size.max(1);
        let (tx, rx) = mpsc::channel(queue_capacity);

        ElasticPool {
            inner: Arc::new(PoolInner {
                conf,
                queue_capacity,
                tx: StdMutex::new(Some(tx)),
                rx: TokioMutex::new(rx),
                state: AtomicU8::new(STATE_NEW),
                current_workers: AtomicU32::new(0),
                busy_workers: AtomicU32::new(0),
                next_worker_id: AtomicU64::new(0),
                handles: StdMutex::new(Vec::new()),
                monitor: StdMutex::new(None),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Number of live workers. Exposed for the monitor and tests.
    pub fn current_workers(&self) -> u32 {
        self.inner.current_workers.load(Ordering::SeqCst)
    }

    /// Number of workers currently executing a job.
    pub fn busy_workers(&self) -> u32 {
        self.inner.busy_workers.load(Ordering::SeqCst)
    }
}

impl<J: PoolJob> WorkerPool<J> for ElasticPool<J> {
    fn start(&self) {
        let swapped = self.inner.state.compare_exchange(
            STATE_NEW,
            STATE_RUNNING,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
        if swapped.is_err() {
            debug!("Worker pool start ignored: already started");
            return;
        }

        for _ in 0..self.inner.conf.min {
            spawn_worker(&self.inner);
        }

        let monitor = tokio::spawn(monitor_loop(self.inner.clone()));
        *self.inner.monitor.lock().unwrap() = Some(monitor);

        debug!(
            min = self.inner.conf.min,
            max = self.inner.conf.max,
            queue = self.inner.queue_capacity,
            "Worker pool started"
        );
    }

    async fn stop(&self, drain_timeout: Duration) {
        let was_running = self
            .inner
            .state
            .swap(STATE_STOPPED, Ordering::SeqCst)
            == STATE_RUNNING;
        if !was_running {
            debug!("Worker pool stop ignored: not running");
            return;
        }

        // Closing the submission side lets workers drain the queue and exit.
        self.inner.tx.lock().unwrap().take();
        self.inner.shutdown.cancel();

        if let Some(monitor) = self.inner.monitor.lock().unwrap().take() {
            monitor.abort();
        }

        let handles: Vec<JoinHandle<()>> =
            self.inner.handles.lock().unwrap().drain(..).collect();

        let deadline = Instant::now() + drain_timeout;
        let mut abandoned = 0usize;
        for mut handle in handles {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if timeout(remaining, &mut handle).await.is_err() {
                handle.abort();
                abandoned += 1;
            }
        }

        if abandoned > 0 {
            warn!(abandoned, "Workers still running at stop timeout were abandoned");
        }
        debug!("Worker pool stopped");
    }

    fn submit(&self, job: J) -> Result<bool, PoolError> {
        if self.inner.state.load(Ordering::SeqCst) != STATE_RUNNING {
            return Err(PoolError::Stopped);
        }

        // All workers busy and headroom left: grow before enqueueing.
        let busy = self.inner.busy_workers.load(Ordering::SeqCst);
        let current = self.inner.current_workers.load(Ordering::SeqCst);
        if busy >= current && current < self.inner.conf.max {
            spawn_worker(&self.inner);
        }

        let guard = self.inner.tx.lock().unwrap();
        let Some(tx) = guard.as_ref() else {
            return Err(PoolError::Stopped);
        };
        match tx.try_send(job) {
            Ok(()) => Ok(true),
            Err(mpsc::error::TrySendError::Full(job)) => {
                trace!(job = %job.id(), "Submission queue full, rejecting job");
                Ok(false)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(PoolError::Stopped),
        }
    }

    fn available_workers(&self) -> i64 {
        if self.inner.state.load(Ordering::SeqCst) != STATE_RUNNING {
            return 0;
        }
        let free_slots = self
            .inner
            .tx
            .lock()
            .unwrap()
            .as_ref()
            .map(|tx| tx.capacity())
            .unwrap_or(0) as i64;

        let max = self.inner.conf.max as i64;
        let busy = self.inner.busy_workers.load(Ordering::SeqCst) as i64;
        (max - busy).max(0) + free_slots
    }
}

/// Registers one more worker if below `max` and spawns its task.
fn spawn_worker<J: PoolJob>(inner: &Arc<PoolInner<J>>) -> bool {
    let max = inner.conf.max;
    let grew = inner
        .current_workers
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| {
            (v < max).then_some(v + 1)
        })
        .is_ok();
    if !grew {
        return false;
    }

    let worker_id = inner.next_worker_id.fetch_add(1, Ordering::Relaxed);
    let handle = tokio::spawn(worker_loop(inner.clone(), worker_id));
    inner.handles.lock().unwrap().push(handle);
    trace!(worker_id, "Spawned worker");
    true
}

/// One worker: pull, process, repeat; retire when idle above the minimum.
async fn worker_loop<J: PoolJob>(inner: Arc<PoolInner<J>>, worker_id: u64) {
    let keep_alive = inner.conf.keep_alive;
    let min = inner.conf.min;
    let mut retired = false;

    loop {
        // Hold the receiver lock only while waiting, never while processing.
        let received = {
            let mut rx = inner.rx.lock().await;
            timeout(keep_alive, rx.recv()).await
        };

        match received {
            Ok(Some(job)) => {
                inner.busy_workers.fetch_add(1, Ordering::SeqCst);
                let job_id = job.id();
                trace!(worker_id, job = %job_id, "Worker picked up job");
                match job.process().await {
                    Ok(()) => debug!(worker_id, job = %job_id, "Job completed"),
                    Err(e) => warn!(worker_id, job = %job_id, error = %e, "Job failed"),
                }
                inner.busy_workers.fetch_sub(1, Ordering::SeqCst);
            }
            Ok(None) => {
                // Channel closed and drained: the pool is stopping.
                break;
            }
            Err(_) => {
                // Idle for keep_alive. Retire only while staying above min;
                // the fetch_update makes concurrent retirements safe.
                let may_retire = inner
                    .current_workers
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| {
                        (v > min).then_some(v - 1)
                    })
                    .is_ok();
                if may_retire {
                    debug!(worker_id, "Idle worker retiring");
                    retired = true;
                    break;
                }
            }
        }
    }

    if !retired {
        inner.current_workers.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Periodic pool upkeep: replace dead workers below `min`, prune finished
/// handles, log utilisation.
async fn monitor_loop<J: PoolJob>(inner: Arc<PoolInner<J>>) {
    let mut ticker = tokio::time::interval(inner.conf.monitoring_period);
    loop {
        tokio::select! {
            _ = inner.shutdown.cancelled() => break,
            _ = ticker.tick() => {
                inner.handles.lock().unwrap().retain(|h| !h.is_finished());

                while inner.current_workers.load(Ordering::SeqCst) < inner.conf.min {
                    if !spawn_worker(&inner) {
                        break;
                    }
                }

                let queued = inner
                    .tx
                    .lock()
                    .unwrap()
                    .as_ref()
                    .map(|tx| inner.queue_capacity - tx.capacity())
                    .unwrap_or(0);
                debug!(
                    workers = inner.current_workers.load(Ordering::SeqCst),
                    busy = inner.busy_workers.load(Ordering::SeqCst),
                    queued,
                    "Worker pool utilisation"
                );
            }
        }
    }
}
