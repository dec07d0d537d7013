//! Wire messages and the payload format the daemon understands.

use std::collections::HashMap;

use serde::Deserialize;
use thiserror::Error;

use crate::types::{AlertId, MessageId, ReceiptHandle};

/// One delivery of a queue message, as handed over by the transport.
///
/// The body is opaque at this layer; [`QueuePayload::parse`] gives it shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub message_id: MessageId,
    pub receipt_handle: ReceiptHandle,
    pub body: String,
    pub attributes: HashMap<String, String>,
}

impl Message {
    pub fn new(
        message_id: MessageId,
        receipt_handle: ReceiptHandle,
        body: impl Into<String>,
    ) -> Self {
        Message {
            message_id,
            receipt_handle,
            body: body.into(),
            attributes: HashMap::new(),
        }
    }
}

/// Errors decoding a message body into a [`QueuePayload`].
#[derive(Debug, Error)]
pub enum PayloadError {
    /// The body is not valid JSON.
    #[error("message body is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// The body decoded but carries no usable `action`.
    #[error("message does not contain an action property")]
    MissingAction,
}

/// The alert block of a queue payload. Extra keys are ignored.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct AlertPayload {
    #[serde(default, rename = "alertId")]
    pub alert_id: AlertId,
}

/// The JSON shape of a message body: `{"action": "...", "alert": {...}, ...}`.
///
/// Unknown top-level keys are preserved only in the raw body, which is passed
/// verbatim to the runbook; decoding here extracts what the job needs.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct QueuePayload {
    pub action: String,

    #[serde(default)]
    pub alert: AlertPayload,
}

impl QueuePayload {
    /// Decodes a message body, rejecting bodies without a non-empty `action`.
    pub fn parse(body: &str) -> Result<Self, PayloadError> {
        let payload: QueuePayload = serde_json::from_str(body)?;
        if payload.action.is_empty() {
            return Err(PayloadError::MissingAction);
        }
        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn parses_action_and_alert_id() {
        let payload =
            QueuePayload::parse(r#"{"action":"restart","alert":{"alertId":"A1"}}"#).unwrap();
        assert_eq!(payload.action, "restart");
        assert_eq!(payload.alert.alert_id, AlertId::new("A1"));
    }

    #[test]
    fn extra_keys_are_ignored() {
        let payload = QueuePayload::parse(
            r#"{"action":"restart","alert":{"alertId":"A1","priority":"P1"},"entity":"db-7"}"#,
        )
        .unwrap();
        assert_eq!(payload.action, "restart");
    }

    #[test]
    fn missing_alert_yields_empty_alert_id() {
        let payload = QueuePayload::parse(r#"{"action":"restart"}"#).unwrap();
        assert_eq!(payload.alert.alert_id, AlertId::default());
    }

    #[test]
    fn missing_action_is_rejected() {
        let err = QueuePayload::parse(r#"{"alert":{"alertId":"A1"}}"#).unwrap_err();
        assert!(matches!(err, PayloadError::Json(_)));
    }

    #[test]
    fn empty_action_is_rejected() {
        let err = QueuePayload::parse(r#"{"action":"","alert":{}}"#).unwrap_err();
        assert!(matches!(err, PayloadError::MissingAction));
    }

    #[test]
    fn garbage_body_is_rejected() {
        let err = QueuePayload::parse("not json").unwrap_err();
        assert!(matches!(err, PayloadError::Json(_)));
    }

    proptest! {
        /// Any non-empty action and alert id survive the decode round-trip.
        #[test]
        fn prop_decode_round_trip(
            action in "[a-zA-Z][a-zA-Z0-9_-]{0,30}",
            alert_id in "[a-zA-Z0-9-]{1,36}",
        ) {
            let body = serde_json::json!({
                "action": action,
                "alert": {"alertId": alert_id},
            })
            .to_string();

            let payload = QueuePayload::parse(&body).unwrap();
            prop_assert_eq!(payload.action, action);
            prop_assert_eq!(payload.alert.alert_id.as_str(), alert_id);
        }
    }
}
