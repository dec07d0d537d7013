//! Queue consumption: the provider capability, wire messages, and per-message
//! jobs.
//!
//! The concrete cloud transport lives outside this crate; it plugs in by
//! implementing [`QueueProvider`]. Everything else here is transport-agnostic:
//! [`Message`] is the opaque delivery handed over by the provider, and a
//! [`Job`] owns exactly one message for the duration of its processing.

pub mod job;
pub mod message;
pub mod provider;
pub mod spool;

pub use job::{Job, JobContext, JobError};
pub use message::{Message, PayloadError, QueuePayload};
pub use provider::{
    AssumeRoleResult, AwsCredentials, ProviderError, QueueMetadata, QueueProvider,
};
pub use spool::FileQueueProvider;
