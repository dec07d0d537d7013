//! The supervisor: owns the poller set and rotates queue credentials.
//!
//! One poller per queue, keyed by queue URL. The supervisor starts and stops
//! them as a group (stopping is best-effort: individual poller errors are
//! logged, never propagated) and runs a rotation ticker that exchanges fresh
//! credentials through the injected [`TokenSource`] whenever a queue's
//! current credentials are inside the expiry grace window. After a successful
//! `refresh_client` the poller is woken, so a loop parked in its token-expiry
//! wait retries immediately instead of sleeping out the error-refresh period.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Configuration;
use crate::pool::ElasticPool;
use crate::poller::{Poller, PollerError};
use crate::queue::job::{Job, JobContext};
use crate::queue::provider::{AssumeRoleResult, ProviderError, QueueMetadata, QueueProvider};
use crate::report::ResultPoster;
use crate::runbook::RunbookExecutor;
use crate::types::QueueUrl;

/// How often the rotation ticker inspects credential expiry.
const CREDENTIAL_CHECK_PERIOD: Duration = Duration::from_secs(30);

/// Credentials are rotated when they expire within this window.
const EXPIRY_GRACE_SECONDS: i64 = 120;

/// Errors from supervisor lifecycle operations.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// `start` was called twice.
    #[error("supervisor is already running")]
    AlreadyRunning,

    /// A poller refused to start.
    #[error(transparent)]
    Poller(#[from] PollerError),
}

/// Exchanges queue metadata for fresh short-lived credentials.
///
/// The production implementation talks to the control plane that issued the
/// queues; tests inject a scripted source.
pub trait TokenSource: Send + Sync + 'static {
    fn fetch_credentials(
        &self,
        metadata: &QueueMetadata,
    ) -> impl Future<Output = Result<AssumeRoleResult, ProviderError>> + Send;
}

/// Token source for transports whose credentials never expire.
///
/// Providers backed by static credentials report no expiry instant, so the
/// rotation ticker never consults this source; it exists to satisfy the
/// supervisor's wiring and fails loudly if ever asked.
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticCredentials;

impl TokenSource for StaticCredentials {
    async fn fetch_credentials(
        &self,
        metadata: &QueueMetadata,
    ) -> Result<AssumeRoleResult, ProviderError> {
        Err(ProviderError::CredentialsRejected(format!(
            "no credential source configured for queue [{}]",
            metadata.queue_url()
        )))
    }
}

type QueuePoller<Q, E, P> = Poller<Q, E, P, ElasticPool<Job<Q, E, P>>>;

/// Owns the pollers and their shared capabilities.
pub struct Supervisor<Q, E, P, T> {
    configuration: Configuration,
    executor: Arc<E>,
    poster: Arc<P>,
    token_source: Arc<T>,

    pollers: HashMap<QueueUrl, QueuePoller<Q, E, P>>,

    running: StdMutex<bool>,
    shutdown: CancellationToken,
    refresh_task: StdMutex<Option<JoinHandle<()>>>,
}

impl<Q, E, P, T> Supervisor<Q, E, P, T>
where
    Q: QueueProvider,
    E: RunbookExecutor,
    P: ResultPoster,
    T: TokenSource,
{
    pub fn new(
        configuration: Configuration,
        executor: Arc<E>,
        poster: Arc<P>,
        token_source: Arc<T>,
    ) -> Self {
        Supervisor {
            configuration,
            executor,
            poster,
            token_source,
            pollers: HashMap::new(),
            running: StdMutex::new(false),
            shutdown: CancellationToken::new(),
            refresh_task: StdMutex::new(None),
        }
    }

    /// Registers a queue: builds its poller and elastic pool from the loaded
    /// configuration. Call before [`start`]; a provider for an already-known
    /// queue URL replaces the previous poller.
    ///
    /// [`start`]: Supervisor::start
    pub fn add_queue(&mut self, provider: Q, integration_id: Option<String>) {
        let metadata = provider.metadata();
        let queue_url = metadata.queue_url().clone();

        let context = Arc::new(JobContext {
            action_mappings: Arc::new(self.configuration.action_mappings.clone()),
            provider: Arc::new(provider),
            executor: self.executor.clone(),
            poster: self.poster.clone(),
            integration_id,
        });
        let pool = ElasticPool::new(self.configuration.pool_conf.clone());
        let poller = Poller::new(self.configuration.poller_conf.clone(), context, pool);

        debug!(queue_url = %queue_url, region = %metadata.region(), "Registered queue");
        self.pollers.insert(queue_url, poller);
    }

    /// Number of registered queues.
    pub fn queue_count(&self) -> usize {
        self.pollers.len()
    }

    /// Starts every poller and the credential rotation ticker.
    pub fn start(&self) -> Result<(), SupervisorError> {
        {
            let mut running = self.running.lock().unwrap();
            if *running {
                return Err(SupervisorError::AlreadyRunning);
            }
            *running = true;
        }

        for (queue_url, poller) in &self.pollers {
            poller.start_polling()?;
            info!(queue_url = %queue_url, "Started poller");
        }

        let pollers: Vec<_> = self.pollers.values().cloned().collect();
        let token_source = self.token_source.clone();
        let shutdown = self.shutdown.clone();
        let handle = tokio::spawn(async move {
            rotation_loop(pollers, token_source, shutdown).await;
        });
        *self.refresh_task.lock().unwrap() = Some(handle);

        info!(queues = self.pollers.len(), "Supervisor started");
        Ok(())
    }

    /// Stops the rotation ticker and every poller.
    ///
    /// Best-effort: poller errors are logged and swallowed. Safe to call when
    /// not running.
    pub async fn stop(&self, drain_timeout: Duration) {
        {
            let mut running = self.running.lock().unwrap();
            if !*running {
                debug!("Supervisor stop ignored: not running");
                return;
            }
            *running = false;
        }

        self.shutdown.cancel();
        let handle = self.refresh_task.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }

        for (queue_url, poller) in &self.pollers {
            if let Err(e) = poller.stop_polling(drain_timeout).await {
                warn!(queue_url = %queue_url, error = %e, "Could not stop poller");
            }
        }

        info!("Supervisor stopped");
    }
}

/// The rotation ticker body.
async fn rotation_loop<Q, E, P, T>(
    pollers: Vec<QueuePoller<Q, E, P>>,
    token_source: Arc<T>,
    shutdown: CancellationToken,
) where
    Q: QueueProvider,
    E: RunbookExecutor,
    P: ResultPoster,
    T: TokenSource,
{
    let mut ticker = tokio::time::interval(CREDENTIAL_CHECK_PERIOD);
    // The first tick fires immediately; skip it so freshly-issued credentials
    // are not re-exchanged at startup.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                refresh_expiring(&pollers, token_source.as_ref()).await;
            }
        }
    }
}

/// Rotates credentials for every poller whose queue is in the grace window.
///
/// Returns how many pollers were refreshed. Failures are logged; the poller
/// keeps its old credentials and retries at the next tick.
async fn refresh_expiring<Q, E, P, T>(pollers: &[QueuePoller<Q, E, P>], token_source: &T) -> usize
where
    Q: QueueProvider,
    E: RunbookExecutor,
    P: ResultPoster,
    T: TokenSource,
{
    let now = Utc::now();
    let grace = chrono::Duration::seconds(EXPIRY_GRACE_SECONDS);
    let mut refreshed = 0;

    for poller in pollers {
        let metadata = poller.metadata();
        if !metadata.expires_within(now, grace) {
            continue;
        }

        match token_source.fetch_credentials(&metadata).await {
            Ok(result) => match poller.refresh_client(result) {
                Ok(()) => {
                    info!(queue_url = %metadata.queue_url(), "Refreshed queue credentials");
                    refreshed += 1;
                }
                Err(e) => warn!(
                    queue_url = %metadata.queue_url(),
                    error = %e,
                    "Provider rejected refreshed credentials"
                ),
            },
            Err(e) => warn!(
                queue_url = %metadata.queue_url(),
                error = %e,
                "Could not fetch fresh credentials"
            ),
        }
    }

    refreshed
}
