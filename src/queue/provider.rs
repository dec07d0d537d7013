//! The queue provider capability.
//!
//! [`QueueProvider`] abstracts one queue of one cloud transport: receiving,
//! deleting, visibility control, and credential rotation. The daemon core
//! never talks to a concrete SDK; the transport wrapper implements this trait
//! and is injected at supervisor construction.
//!
//! # Credential discipline
//!
//! `refresh_client` atomically swaps the provider's credentials and must be
//! callable while receives are in flight: many receivers, one rotator.
//! Receives issued after `refresh_client` returns observe the new
//! credentials; in-flight receives may still complete under the old ones and
//! are bounded by the transport's own timeout.

use std::future::Future;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::types::{QueueUrl, Region};

use super::message::Message;

/// Errors surfaced by a queue provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The transport call failed; the message (if any) stays visible or is
    /// redelivered after its visibility timeout.
    #[error("queue transport error: {0}")]
    Transport(String),

    /// The provider's credentials have expired; receives are suspended until
    /// the supervisor rotates them.
    #[error("queue credentials are expired")]
    TokenExpired,

    /// A credential rotation was rejected by the transport.
    #[error("credential refresh rejected: {0}")]
    CredentialsRejected(String),
}

/// Result type for provider operations.
pub type Result<T> = std::result::Result<T, ProviderError>;

/// Immutable description of the queue a provider is bound to.
///
/// Replaced wholesale on credential rotation; never mutated in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMetadata {
    region: Region,
    queue_url: QueueUrl,
    expires_at: Option<DateTime<Utc>>,
}

impl QueueMetadata {
    pub fn new(region: Region, queue_url: QueueUrl, expires_at: Option<DateTime<Utc>>) -> Self {
        QueueMetadata {
            region,
            queue_url,
            expires_at,
        }
    }

    pub fn region(&self) -> &Region {
        &self.region
    }

    pub fn queue_url(&self) -> &QueueUrl {
        &self.queue_url
    }

    /// When the current credentials lapse, if known.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    /// Returns true if the credentials are expired at `now`, or will be
    /// within `grace`.
    pub fn expires_within(&self, now: DateTime<Utc>, grace: chrono::Duration) -> bool {
        match self.expires_at {
            Some(at) => at - now <= grace,
            None => false,
        }
    }
}

/// Short-lived credentials handed out by the control plane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AwsCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: String,
}

/// The result of a credential exchange: fresh keys plus their expiry instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssumeRoleResult {
    pub credentials: AwsCredentials,
    pub expires_at: DateTime<Utc>,
}

/// Capability over one message queue.
///
/// Implementations wrap a concrete transport client. All methods take
/// `&self`; the credential swap in `refresh_client` uses interior mutability
/// (reader/writer discipline) so receives and rotation can overlap safely.
pub trait QueueProvider: Send + Sync + 'static {
    /// Requests up to `max` messages, hiding each received message from other
    /// consumers for `visibility_timeout` seconds. May long-poll internally.
    fn receive_message(
        &self,
        max: i64,
        visibility_timeout: i64,
    ) -> impl Future<Output = Result<Vec<Message>>> + Send;

    /// Permanently removes a message from the queue.
    fn delete_message(&self, message: &Message) -> impl Future<Output = Result<()>> + Send;

    /// Changes the remaining visibility timeout of a received message.
    /// `seconds = 0` releases the message for immediate redelivery.
    fn change_message_visibility(
        &self,
        message: &Message,
        seconds: i64,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Atomically swaps the provider's credentials. Receives issued after
    /// this returns use the new credentials.
    fn refresh_client(&self, assume_role_result: AssumeRoleResult) -> Result<()>;

    /// Read-only check of the current credential lifetime.
    fn is_token_expired(&self) -> bool;

    /// A snapshot of the queue's metadata under the current credentials.
    fn metadata(&self) -> QueueMetadata;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata_expiring_at(at: Option<DateTime<Utc>>) -> QueueMetadata {
        QueueMetadata::new(
            Region::new("eu-west-1"),
            QueueUrl::new("https://queue.example.com/marid"),
            at,
        )
    }

    #[test]
    fn expiry_within_grace_is_detected() {
        let now = Utc::now();
        let metadata = metadata_expiring_at(Some(now + chrono::Duration::seconds(30)));

        assert!(metadata.expires_within(now, chrono::Duration::seconds(60)));
        assert!(!metadata.expires_within(now, chrono::Duration::seconds(10)));
    }

    #[test]
    fn unknown_expiry_never_reports_expiring() {
        let metadata = metadata_expiring_at(None);
        assert!(!metadata.expires_within(Utc::now(), chrono::Duration::days(365)));
    }

    #[test]
    fn already_expired_is_within_any_grace() {
        let now = Utc::now();
        let metadata = metadata_expiring_at(Some(now - chrono::Duration::seconds(1)));
        assert!(metadata.expires_within(now, chrono::Duration::zero()));
    }
}
