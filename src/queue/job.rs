//! Per-message jobs.
//!
//! A [`Job`] owns exactly one received [`Message`]. It is created when the
//! poller submits the message to the worker pool and destroyed when
//! [`Job::process`] returns. Processing decodes the payload, resolves and
//! runs the mapped action, always reports the outcome upstream, and deletes
//! the message once the report has landed.
//!
//! # Disposition rules
//!
//! Errors in message *content* (undecodable body, unknown action, failed
//! runbook) are absorbed: the failure is reported upstream and the message is
//! deleted, so poison messages never wedge the queue. Only a failure to post
//! the result leaves the message in place, to be redelivered after its
//! visibility timeout.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::config::MappedAction;
use crate::pool::PoolJob;
use crate::report::{ActionResult, ReportError, ResultPoster};
use crate::runbook::RunbookExecutor;
use crate::types::{ActionName, AlertId};

use super::message::{Message, PayloadError, QueuePayload};
use super::provider::QueueProvider;

/// Errors from processing a single message.
#[derive(Debug, Error)]
pub enum JobError {
    /// The body was undecodable or carried no action. Reported and deleted.
    #[error("malformed payload: {0}")]
    MalformedPayload(#[from] PayloadError),

    /// The action has no mapping. Reported and deleted.
    #[error("There is no mapped action found for [{0}]")]
    UnknownAction(ActionName),

    /// The result could not be posted upstream; the message was left for
    /// redelivery.
    #[error("could not post result: {0}")]
    PostResult(#[from] ReportError),
}

/// Shared, read-only context every job of one poller borrows.
///
/// The mappings map is published once at startup and never mutated; the
/// provider is shared with the poller so the job can delete its own message.
pub struct JobContext<Q, E, P> {
    pub action_mappings: Arc<HashMap<ActionName, MappedAction>>,
    pub provider: Arc<Q>,
    pub executor: Arc<E>,
    pub poster: Arc<P>,
    pub integration_id: Option<String>,
}

/// One message's worth of work.
pub struct Job<Q, E, P> {
    message: Message,
    context: Arc<JobContext<Q, E, P>>,
}

impl<Q, E, P> Job<Q, E, P>
where
    Q: QueueProvider,
    E: RunbookExecutor,
    P: ResultPoster,
{
    pub fn new(message: Message, context: Arc<JobContext<Q, E, P>>) -> Self {
        Job { message, context }
    }

    /// The id of the owned message.
    pub fn message_id(&self) -> &crate::types::MessageId {
        &self.message.message_id
    }

    /// Processes the owned message to completion.
    ///
    /// The returned error is for logging only; by the time this returns, the
    /// message's fate (deleted or left for redelivery) is already settled.
    #[instrument(skip(self), fields(message_id = %self.message.message_id))]
    pub async fn process(self) -> Result<(), JobError> {
        let payload = match QueuePayload::parse(&self.message.body) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(
                    message_id = %self.message.message_id,
                    error = %e,
                    "Message body is malformed"
                );
                let result = ActionResult::failure(AlertId::default(), "", e.to_string());
                self.report_and_delete(result).await?;
                return Err(JobError::MalformedPayload(e));
            }
        };

        let action = ActionName::new(payload.action.clone());
        let alert_id = payload.alert.alert_id.clone();

        let Some(mapping) = self.context.action_mappings.get(&action) else {
            let failure = format!("There is no mapped action found for [{action}]");
            warn!(
                message_id = %self.message.message_id,
                action = %action,
                "No mapping for action"
            );
            let result = ActionResult::failure(alert_id, payload.action, failure);
            self.report_and_delete(result).await?;
            return Err(JobError::UnknownAction(action));
        };

        let result = self.execute(mapping, &action, alert_id).await;
        self.report_and_delete(result).await?;
        Ok(())
    }

    /// Runs the mapped runbook and folds its outcome into an [`ActionResult`].
    ///
    /// The action succeeded iff the runbook completed with an empty stderr.
    /// Non-empty stderr on a clean exit is a logical failure whose message is
    /// the stderr text; an execution error wins over stderr when both exist.
    async fn execute(
        &self,
        mapping: &MappedAction,
        action: &ActionName,
        alert_id: AlertId,
    ) -> ActionResult {
        match self.context.executor.run(mapping, &self.message.body).await {
            Ok(output) if output.stderr.is_empty() => {
                debug!(
                    message_id = %self.message.message_id,
                    action = %action,
                    "Action execution completed"
                );
                ActionResult::success(alert_id, action.as_str())
            }
            Ok(output) => {
                debug!(
                    message_id = %self.message.message_id,
                    action = %action,
                    stderr = %output.stderr,
                    "Action execution produced error output"
                );
                ActionResult::failure(alert_id, action.as_str(), output.stderr)
            }
            Err(e) => {
                debug!(
                    message_id = %self.message.message_id,
                    action = %action,
                    error = %e,
                    "Action execution failed"
                );
                ActionResult::failure(alert_id, action.as_str(), e.to_string())
            }
        }
    }

    /// Posts the result, then deletes the message.
    ///
    /// The order matters: the delete happens only once the report has landed,
    /// so a post failure leaves the message for visibility-timeout
    /// redelivery. A delete failure after a successful post is logged and
    /// swallowed; the worst case is one duplicate report.
    async fn report_and_delete(&self, result: ActionResult) -> Result<(), JobError> {
        self.context.poster.post_result(&result).await?;

        if let Err(e) = self.context.provider.delete_message(&self.message).await {
            warn!(
                message_id = %self.message.message_id,
                integration_id = self.context.integration_id.as_deref().unwrap_or(""),
                error = %e,
                "Could not delete message after reporting"
            );
        } else {
            debug!(message_id = %self.message.message_id, "Deleted message");
        }
        Ok(())
    }
}

impl<Q, E, P> PoolJob for Job<Q, E, P>
where
    Q: QueueProvider,
    E: RunbookExecutor,
    P: ResultPoster,
{
    type Error = JobError;

    fn id(&self) -> String {
        self.message.message_id.to_string()
    }

    async fn process(self) -> Result<(), JobError> {
        Job::process(self).await
    }
}
