//! Shared test doubles: recording mock capabilities and fixture builders.
//!
//! Each mock records the calls made against it so tests can assert the exact
//! interaction pattern (which messages were deleted, which results posted,
//! which visibilities terminated).

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::config::{ActionSource, Configuration, MappedAction, PoolConf};
use crate::pool::{PoolError, WorkerPool};
use crate::queue::job::JobContext;
use crate::queue::message::Message;
use crate::queue::provider::{
    AssumeRoleResult, AwsCredentials, ProviderError, QueueMetadata, QueueProvider,
};
use crate::report::{ActionResult, ReportError, ResultPoster};
use crate::runbook::{ExecutionOutput, RunbookError, RunbookExecutor};
use crate::supervisor::TokenSource;
use crate::types::{ActionName, MessageId, QueueUrl, ReceiptHandle, Region};

/// A message with the given id and body; the receipt handle is derived.
pub fn make_message(id: &str, body: &str) -> Message {
    Message::new(
        MessageId::new(id),
        ReceiptHandle::new(format!("receipt-{id}")),
        body,
    )
}

/// A local mapping pointing at the given runbook path.
pub fn local_mapping(path: &str) -> MappedAction {
    MappedAction {
        source: ActionSource::Local {
            file_path: path.into(),
        },
        environment_variables: Vec::new(),
    }
}

/// Plausible fresh credentials expiring an hour from now.
pub fn assume_role_result() -> AssumeRoleResult {
    AssumeRoleResult {
        credentials: AwsCredentials {
            access_key_id: "AKIATEST".to_string(),
            secret_access_key: "secret".to_string(),
            session_token: "session".to_string(),
        },
        expires_at: Utc::now() + chrono::Duration::hours(1),
    }
}

/// A valid configuration with one local `restart` mapping and a small pool.
pub fn minimal_configuration() -> Configuration {
    Configuration {
        api_key: "key-1".to_string(),
        base_url: "https://api.example.com".to_string(),
        action_mappings: HashMap::from([(ActionName::new("restart"), local_mapping("/tmp/r.sh"))]),
        pool_conf: PoolConf {
            min: 1,
            max: 2,
            queue_size: 4,
            keep_alive: std::time::Duration::from_millis(200),
            monitoring_period: std::time::Duration::from_millis(100),
        },
        ..Configuration::default()
    }
}

/// Builds a [`JobContext`] over the given mappings and capabilities.
pub fn job_context<Q, E, P>(
    mappings: impl IntoIterator<Item = (ActionName, MappedAction)>,
    provider: Q,
    executor: E,
    poster: P,
) -> Arc<JobContext<Q, E, P>> {
    Arc::new(JobContext {
        action_mappings: Arc::new(mappings.into_iter().collect()),
        provider: Arc::new(provider),
        executor: Arc::new(executor),
        poster: Arc::new(poster),
        integration_id: None,
    })
}

// ─── MockProvider ─────────────────────────────────────────────────────────────

/// A scripted [`QueueProvider`] that records every interaction.
pub struct MockProvider {
    queue_url: QueueUrl,
    expires_at: StdMutex<Option<DateTime<Utc>>>,
    token_expired: AtomicBool,

    batches: StdMutex<VecDeque<Result<Vec<Message>, ProviderError>>>,
    receive_calls: StdMutex<Vec<(i64, i64)>>,

    deleted: StdMutex<Vec<String>>,
    fail_deletes: AtomicBool,

    visibility_changes: StdMutex<Vec<(String, i64)>>,
    visibility_attempts: AtomicUsize,
    fail_visibility: AtomicBool,

    refreshes: StdMutex<Vec<AssumeRoleResult>>,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::with_queue_url("https://queue.example.com/marid")
    }
}

impl MockProvider {
    pub fn with_queue_url(queue_url: &str) -> Self {
        MockProvider {
            queue_url: QueueUrl::new(queue_url),
            expires_at: StdMutex::new(None),
            token_expired: AtomicBool::new(false),
            batches: StdMutex::new(VecDeque::new()),
            receive_calls: StdMutex::new(Vec::new()),
            deleted: StdMutex::new(Vec::new()),
            fail_deletes: AtomicBool::new(false),
            visibility_changes: StdMutex::new(Vec::new()),
            visibility_attempts: AtomicUsize::new(0),
            fail_visibility: AtomicBool::new(false),
            refreshes: StdMutex::new(Vec::new()),
        }
    }

    /// Queues the outcome of the next receive. Later receives with an empty
    /// script return an empty batch.
    pub fn push_batch(&self, batch: Result<Vec<Message>, ProviderError>) {
        self.batches.lock().unwrap().push_back(batch);
    }

    /// `(max, visibility_timeout)` of every receive so far.
    pub fn receive_calls(&self) -> Vec<(i64, i64)> {
        self.receive_calls.lock().unwrap().clone()
    }

    /// Ids of deleted messages, in deletion order.
    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }

    pub fn fail_deletes(&self) {
        self.fail_deletes.store(true, Ordering::SeqCst);
    }

    /// `(message_id, seconds)` of every successful visibility change.
    pub fn visibility_changes(&self) -> Vec<(String, i64)> {
        self.visibility_changes.lock().unwrap().clone()
    }

    /// Visibility changes attempted, successful or not.
    pub fn visibility_attempts(&self) -> usize {
        self.visibility_attempts.load(Ordering::SeqCst)
    }

    pub fn fail_visibility_changes(&self) {
        self.fail_visibility.store(true, Ordering::SeqCst);
    }

    pub fn set_token_expired(&self, expired: bool) {
        self.token_expired.store(expired, Ordering::SeqCst);
    }

    pub fn set_expires_at(&self, at: Option<DateTime<Utc>>) {
        *self.expires_at.lock().unwrap() = at;
    }

    /// Credential refreshes accepted so far.
    pub fn refreshes(&self) -> usize {
        self.refreshes.lock().unwrap().len()
    }
}

impl QueueProvider for MockProvider {
    async fn receive_message(
        &self,
        max: i64,
        visibility_timeout: i64,
    ) -> Result<Vec<Message>, ProviderError> {
        self.receive_calls
            .lock()
            .unwrap()
            .push((max, visibility_timeout));
        self.batches
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    async fn delete_message(&self, message: &Message) -> Result<(), ProviderError> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(ProviderError::Transport("scripted delete failure".into()));
        }
        self.deleted
            .lock()
            .unwrap()
            .push(message.message_id.to_string());
        Ok(())
    }

    async fn change_message_visibility(
        &self,
        message: &Message,
        seconds: i64,
    ) -> Result<(), ProviderError> {
        self.visibility_attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_visibility.load(Ordering::SeqCst) {
            return Err(ProviderError::Transport(
                "scripted visibility failure".into(),
            ));
        }
        self.visibility_changes
            .lock()
            .unwrap()
            .push((message.message_id.to_string(), seconds));
        Ok(())
    }

    fn refresh_client(&self, assume_role_result: AssumeRoleResult) -> Result<(), ProviderError> {
        *self.expires_at.lock().unwrap() = Some(assume_role_result.expires_at);
        self.token_expired.store(false, Ordering::SeqCst);
        self.refreshes.lock().unwrap().push(assume_role_result);
        Ok(())
    }

    fn is_token_expired(&self) -> bool {
        self.token_expired.load(Ordering::SeqCst)
    }

    fn metadata(&self) -> QueueMetadata {
        QueueMetadata::new(
            Region::new("eu-west-1"),
            self.queue_url.clone(),
            *self.expires_at.lock().unwrap(),
        )
    }
}

// ─── MockExecutor ─────────────────────────────────────────────────────────────

/// A [`RunbookExecutor`] returning scripted outcomes and recording payloads.
///
/// With an empty script, every run succeeds with empty output.
#[derive(Default)]
pub struct MockExecutor {
    script: StdMutex<VecDeque<Result<ExecutionOutput, RunbookError>>>,
    invocations: StdMutex<Vec<String>>,
}

impl MockExecutor {
    pub fn returning(outcome: Result<ExecutionOutput, RunbookError>) -> Self {
        let executor = MockExecutor::default();
        executor.script.lock().unwrap().push_back(outcome);
        executor
    }

    /// Payload bodies passed to `run`, in call order.
    pub fn invocations(&self) -> Vec<String> {
        self.invocations.lock().unwrap().clone()
    }
}

impl RunbookExecutor for MockExecutor {
    async fn run(
        &self,
        _action: &MappedAction,
        payload: &str,
    ) -> Result<ExecutionOutput, RunbookError> {
        self.invocations.lock().unwrap().push(payload.to_string());
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(ExecutionOutput::default()))
    }
}

// ─── MockPoster ───────────────────────────────────────────────────────────────

/// A [`ResultPoster`] recording posted results; optionally always failing.
#[derive(Default)]
pub struct MockPoster {
    posted: StdMutex<Vec<ActionResult>>,
    fail: AtomicBool,
}

impl MockPoster {
    pub fn failing() -> Self {
        let poster = MockPoster::default();
        poster.fail.store(true, Ordering::SeqCst);
        poster
    }

    pub fn posted(&self) -> Vec<ActionResult> {
        self.posted.lock().unwrap().clone()
    }
}

impl ResultPoster for MockPoster {
    async fn post_result(&self, result: &ActionResult) -> Result<(), ReportError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(ReportError::Status {
                status: 503,
                body: "scripted post failure".to_string(),
            });
        }
        self.posted.lock().unwrap().push(result.clone());
        Ok(())
    }
}

// ─── MockPool ─────────────────────────────────────────────────────────────────

/// A [`WorkerPool`] with a scripted submission outcome per call.
///
/// Jobs are dropped, not executed; the exhausted script accepts everything.
pub struct MockPool {
    outcomes: StdMutex<VecDeque<Result<bool, PoolError>>>,
    submitted: AtomicUsize,
    available: AtomicI64,
    started: AtomicBool,
    stopped: AtomicBool,
}

impl MockPool {
    pub fn with_available(available: i64) -> Self {
        MockPool {
            outcomes: StdMutex::new(VecDeque::new()),
            submitted: AtomicUsize::new(0),
            available: AtomicI64::new(available),
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        }
    }

    pub fn script_submits(&self, outcomes: impl IntoIterator<Item = Result<bool, PoolError>>) {
        self.outcomes.lock().unwrap().extend(outcomes);
    }

    pub fn submitted(&self) -> usize {
        self.submitted.load(Ordering::SeqCst)
    }
}

impl<J: Send + 'static> WorkerPool<J> for MockPool {
    fn start(&self) {
        self.started.store(true, Ordering::SeqCst);
    }

    async fn stop(&self, _drain_timeout: std::time::Duration) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    fn submit(&self, _job: J) -> Result<bool, PoolError> {
        self.submitted.fetch_add(1, Ordering::SeqCst);
        self.outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(true))
    }

    fn available_workers(&self) -> i64 {
        self.available.load(Ordering::SeqCst)
    }
}

// ─── MockTokenSource ──────────────────────────────────────────────────────────

/// A [`TokenSource`] handing out fresh one-hour credentials, or always
/// failing.
#[derive(Default)]
pub struct MockTokenSource {
    fail: AtomicBool,
    fetches: AtomicUsize,
}

impl MockTokenSource {
    pub fn failing() -> Self {
        let source = MockTokenSource::default();
        source.fail.store(true, Ordering::SeqCst);
        source
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

impl TokenSource for MockTokenSource {
    async fn fetch_credentials(
        &self,
        _metadata: &QueueMetadata,
    ) -> Result<AssumeRoleResult, ProviderError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(ProviderError::Transport(
                "scripted token exchange failure".to_string(),
            ));
        }
        Ok(assume_role_result())
    }
}
