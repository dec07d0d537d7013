//! The polling loop coupling one queue to one worker pool.
//!
//! A poller's run loop receives messages under flow control from its pool,
//! wraps each in a [`Job`], and submits it. Backpressure is expressed through
//! visibility: a message rejected by a full-but-healthy pool is released
//! immediately (`visibility = 0`) so another consumer, or this one a moment
//! later, picks it up without waiting out the visibility timeout. A genuinely
//! saturated consumer recovers via the normal timeout instead, because the
//! loop simply stops asking for messages while no capacity is available.
//!
//! # Lifecycle
//!
//! `Stopped → Starting → Running → Stopping → Stopped`, serialised under a
//! mutex; `start_polling`/`stop_polling` in the wrong state fail with
//! [`PollerError::InvalidState`] and change nothing. Shutdown is a
//! cancellation token observed at the top of every loop iteration; waits are
//! interruptible by the token or by a wake-up notification (used by the
//! supervisor after a credential refresh).

use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::pool::WorkerPool;
use crate::queue::job::{Job, JobContext};
use crate::queue::message::Message;
use crate::queue::provider::{AssumeRoleResult, ProviderError, QueueMetadata, QueueProvider};
use crate::report::ResultPoster;
use crate::runbook::RunbookExecutor;
use crate::config::PollerConf;

/// How long the loop sleeps between checks while credentials are expired.
pub(crate) const ERROR_REFRESH_PERIOD: Duration = Duration::from_secs(60);

/// Errors from poller lifecycle transitions.
#[derive(Debug, Error)]
pub enum PollerError {
    /// The requested transition is not legal from the current state.
    #[error("cannot {operation} poller while {state}")]
    InvalidState {
        operation: &'static str,
        state: LifecycleState,
    },
}

/// The poller's lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LifecycleState::Stopped => "stopped",
            LifecycleState::Starting => "starting",
            LifecycleState::Running => "running",
            LifecycleState::Stopping => "stopping",
        };
        write!(f, "{s}")
    }
}

struct Lifecycle {
    state: LifecycleState,
    /// Fresh token per start; cancelling it ends the current run loop.
    quit: CancellationToken,
}

struct PollerInner<Q, E, P, W> {
    conf: PollerConf,
    context: Arc<JobContext<Q, E, P>>,
    pool: W,
    lifecycle: StdMutex<Lifecycle>,
    wake: Notify,
}

/// One queue's polling loop. Cheap to clone; clones share the same poller.
pub struct Poller<Q, E, P, W> {
    inner: Arc<PollerInner<Q, E, P, W>>,
}

impl<Q, E, P, W> Clone for Poller<Q, E, P, W> {
    fn clone(&self) -> Self {
        Poller {
            inner: self.inner.clone(),
        }
    }
}

impl<Q, E, P, W> Poller<Q, E, P, W>
where
    Q: QueueProvider,
    E: RunbookExecutor,
    P: ResultPoster,
    W: WorkerPool<Job<Q, E, P>>,
{
    pub fn new(conf: PollerConf, context: Arc<JobContext<Q, E, P>>, pool: W) -> Self {
        Poller {
            inner: Arc::new(PollerInner {
                conf,
                context,
                pool,
                lifecycle: StdMutex::new(Lifecycle {
                    state: LifecycleState::Stopped,
                    quit: CancellationToken::new(),
                }),
                wake: Notify::new(),
            }),
        }
    }

    /// The metadata of the queue this poller drains.
    pub fn metadata(&self) -> QueueMetadata {
        self.inner.context.provider.metadata()
    }

    /// The current lifecycle state.
    pub fn state(&self) -> LifecycleState {
        self.inner.lifecycle.lock().unwrap().state
    }

    /// Starts the run loop and the worker pool.
    ///
    /// Fails with [`PollerError::InvalidState`] unless currently stopped.
    pub fn start_polling(&self) -> Result<(), PollerError> {
        let mut lifecycle = self.inner.lifecycle.lock().unwrap();
        if lifecycle.state != LifecycleState::Stopped {
            return Err(PollerError::InvalidState {
                operation: "start",
                state: lifecycle.state,
            });
        }
        lifecycle.state = LifecycleState::Starting;

        let quit = CancellationToken::new();
        lifecycle.quit = quit.clone();

        self.inner.pool.start();
        tokio::spawn(run(self.inner.clone(), quit));

        lifecycle.state = LifecycleState::Running;
        Ok(())
    }

    /// Signals the run loop to exit, wakes any waiter, and drains the pool.
    ///
    /// Fails with [`PollerError::InvalidState`] unless currently running.
    /// The loop exits at its next state check; an in-flight receive is not
    /// cancelled and is bounded by the transport's own timeout.
    pub async fn stop_polling(&self, drain_timeout: Duration) -> Result<(), PollerError> {
        {
            let mut lifecycle = self.inner.lifecycle.lock().unwrap();
            if lifecycle.state != LifecycleState::Running {
                return Err(PollerError::InvalidState {
                    operation: "stop",
                    state: lifecycle.state,
                });
            }
            lifecycle.state = LifecycleState::Stopping;
            lifecycle.quit.cancel();
        }
        self.inner.wake.notify_waiters();

        self.inner.pool.stop(drain_timeout).await;

        self.inner.lifecycle.lock().unwrap().state = LifecycleState::Stopped;
        info!(queue_url = %self.metadata().queue_url(), "Poller stopped");
        Ok(())
    }

    /// Swaps the provider's credentials and wakes the run loop so a
    /// token-expiry wait retries immediately.
    pub fn refresh_client(
        &self,
        assume_role_result: AssumeRoleResult,
    ) -> Result<(), ProviderError> {
        self.inner.context.provider.refresh_client(assume_role_result)?;
        self.wake();
        Ok(())
    }

    /// Interrupts the current wait, if any.
    pub fn wake(&self) {
        self.inner.wake.notify_one();
    }
}

/// The run loop: one iteration is either a poll or a wait.
async fn run<Q, E, P, W>(inner: Arc<PollerInner<Q, E, P, W>>, quit: CancellationToken)
where
    Q: QueueProvider,
    E: RunbookExecutor,
    P: ResultPoster,
    W: WorkerPool<Job<Q, E, P>>,
{
    let metadata = inner.context.provider.metadata();
    let queue_url = metadata.queue_url().clone();
    info!(queue_url = %queue_url, "Poller started");

    loop {
        if quit.is_cancelled() {
            break;
        }

        if inner.context.provider.is_token_expired() {
            warn!(
                region = %metadata.region(),
                "Security token is expired, skipping receive"
            );
            wait(&inner, &quit, ERROR_REFRESH_PERIOD).await;
        } else if poll(&inner).await {
            wait(&inner, &quit, inner.conf.polling_wait_interval).await;
        }
    }

    info!(queue_url = %queue_url, "Poller run loop exited");
}

/// One poll: receive up to the pool's capacity and submit everything.
///
/// Returns `true` when the loop should wait before polling again (no
/// capacity, transport error, empty batch, or a stopped pool) and `false`
/// when there was work and the next poll should happen immediately.
async fn poll<Q, E, P, W>(inner: &Arc<PollerInner<Q, E, P, W>>) -> bool
where
    Q: QueueProvider,
    E: RunbookExecutor,
    P: ResultPoster,
    W: WorkerPool<Job<Q, E, P>>,
{
    let available = inner.pool.available_workers();
    if available <= 0 {
        return true;
    }

    let metadata = inner.context.provider.metadata();
    let max_messages = inner.conf.max_number_of_messages.min(available);

    let messages = match inner
        .context
        .provider
        .receive_message(max_messages, inner.conf.visibility_timeout_in_seconds)
        .await
    {
        Ok(messages) => messages,
        Err(e) => {
            error!(region = %metadata.region(), error = %e, "Could not receive messages");
            return true;
        }
    };

    if messages.is_empty() {
        trace!(region = %metadata.region(), "No new messages in the queue");
        return true;
    }
    debug!(
        region = %metadata.region(),
        count = messages.len(),
        "Received messages"
    );

    for (index, message) in messages.iter().enumerate() {
        let job = Job::new(message.clone(), inner.context.clone());
        match inner.pool.submit(job) {
            Ok(true) => {}
            Ok(false) => {
                // Pool healthy but full: release just this message.
                terminate_visibility(inner, &messages[index..=index]).await;
            }
            Err(e) => {
                // Pool stopped: release this message and the rest of the batch.
                debug!(error = %e, "Submission failed, terminating remaining messages");
                terminate_visibility(inner, &messages[index..]).await;
                return true;
            }
        }
    }

    false
}

/// Releases each message for immediate redelivery (`visibility = 0`).
async fn terminate_visibility<Q, E, P, W>(inner: &Arc<PollerInner<Q, E, P, W>>, messages: &[Message])
where
    Q: QueueProvider,
    E: RunbookExecutor,
    P: ResultPoster,
    W: WorkerPool<Job<Q, E, P>>,
{
    let metadata = inner.context.provider.metadata();
    for message in messages {
        match inner
            .context
            .provider
            .change_message_visibility(message, 0)
            .await
        {
            Ok(()) => debug!(
                region = %metadata.region(),
                message_id = %message.message_id,
                "Terminated message visibility"
            ),
            Err(e) => warn!(
                region = %metadata.region(),
                message_id = %message.message_id,
                error = %e,
                "Could not terminate message visibility"
            ),
        }
    }
}

/// Sleeps for `interval`, returning early on wake-up or shutdown.
async fn wait<Q, E, P, W>(
    inner: &Arc<PollerInner<Q, E, P, W>>,
    quit: &CancellationToken,
    interval: Duration,
) {
    tokio::select! {
        _ = tokio::time::sleep(interval) => {}
        _ = inner.wake.notified() => {
            debug!("Poller interrupted while waiting for next poll");
        }
        _ = quit.cancelled() => {}
    }
}
