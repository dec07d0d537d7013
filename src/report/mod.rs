//! Upstream result reporting.
//!
//! Every processed message produces an [`ActionResult`] which is posted to
//! the alerting service, success or failure alike. The [`ResultPoster`] trait
//! is the capability jobs are constructed with; [`OpsGenieReporter`] is the
//! production implementation, an HTTP client posting JSON with `GenieKey`
//! authorization and retrying transient failures with exponential backoff.

pub mod retry;

use std::future::Future;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::types::AlertId;

use self::retry::{RetryConfig, retry_with_backoff};

/// Path of the action-result endpoint relative to the configured base URL.
const RESULT_PATH: &str = "/v2/integrations/maridAction";

/// Errors posting a result upstream.
#[derive(Debug, Error)]
pub enum ReportError {
    /// The request could not be sent or the response not read.
    #[error("result post failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The sink answered with a non-success status.
    #[error("result post rejected with status {status}: {body}")]
    Status { status: u16, body: String },
}

impl ReportError {
    /// Transient errors are worth retrying; rejections with client-error
    /// statuses are not.
    pub fn is_transient(&self) -> bool {
        match self {
            ReportError::Http(_) => true,
            ReportError::Status { status, .. } => *status == 429 || *status >= 500,
        }
    }
}

/// Result type for reporting operations.
pub type Result<T> = std::result::Result<T, ReportError>;

/// The outcome of one processed message, as reported upstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionResult {
    pub is_successful: bool,
    pub alert_id: AlertId,
    pub action: String,
    pub failure_message: String,
}

impl ActionResult {
    /// A successful result for the given alert and action.
    pub fn success(alert_id: AlertId, action: impl Into<String>) -> Self {
        ActionResult {
            is_successful: true,
            alert_id,
            action: action.into(),
            failure_message: String::new(),
        }
    }

    /// A failed result carrying the failure message.
    pub fn failure(
        alert_id: AlertId,
        action: impl Into<String>,
        failure_message: impl Into<String>,
    ) -> Self {
        ActionResult {
            is_successful: false,
            alert_id,
            action: action.into(),
            failure_message: failure_message.into(),
        }
    }
}

/// Posts action results to the upstream alerting service.
pub trait ResultPoster: Send + Sync + 'static {
    fn post_result(&self, result: &ActionResult) -> impl Future<Output = Result<()>> + Send;
}

/// Production poster: JSON over HTTPS with `Authorization: GenieKey <apiKey>`.
#[derive(Debug, Clone)]
pub struct OpsGenieReporter {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    retry: RetryConfig,
}

impl OpsGenieReporter {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        OpsGenieReporter {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
            retry: RetryConfig::DEFAULT,
        }
    }

    /// Overrides the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// The full endpoint URL results are posted to.
    pub fn endpoint(&self) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), RESULT_PATH)
    }

    async fn post_once(&self, result: &ActionResult) -> Result<()> {
        let response = self
            .client
            .post(self.endpoint())
            .header("Authorization", format!("GenieKey {}", self.api_key))
            .json(result)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(ReportError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

impl ResultPoster for OpsGenieReporter {
    async fn post_result(&self, result: &ActionResult) -> Result<()> {
        let outcome = retry_with_backoff(self.retry, || self.post_once(result)).await;
        match &outcome {
            Ok(()) => debug!(
                alert_id = %result.alert_id,
                action = %result.action,
                successful = result.is_successful,
                "Posted action result"
            ),
            Err(e) => warn!(
                alert_id = %result.alert_id,
                action = %result.action,
                error = %e,
                "Could not post action result"
            ),
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_joins_without_double_slash() {
        let reporter = OpsGenieReporter::new("https://api.example.com/", "k");
        assert_eq!(
            reporter.endpoint(),
            "https://api.example.com/v2/integrations/maridAction"
        );
    }

    #[test]
    fn result_serializes_with_wire_keys() {
        let result = ActionResult::failure(AlertId::new("A1"), "restart", "boom");
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "isSuccessful": false,
                "alertId": "A1",
                "action": "restart",
                "failureMessage": "boom",
            })
        );
    }

    #[test]
    fn success_helper_has_empty_failure_message() {
        let result = ActionResult::success(AlertId::new("A1"), "restart");
        assert!(result.is_successful);
        assert_eq!(result.failure_message, "");
    }

    #[test]
    fn server_errors_are_transient() {
        assert!(
            ReportError::Status {
                status: 503,
                body: String::new()
            }
            .is_transient()
        );
        assert!(
            ReportError::Status {
                status: 429,
                body: String::new()
            }
            .is_transient()
        );
    }

    #[test]
    fn client_rejections_are_permanent() {
        assert!(
            !ReportError::Status {
                status: 422,
                body: String::new()
            }
            .is_transient()
        );
    }
}
