// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! JSON frames exchanged with the bridge sidecar.
//!
//! Sidecar -> Tether:
//! ```json
//! {"type": "pairing_code", "code": "2@...", "expires_at": "2026-01-01T00:00:00Z"}
//! {"type": "connected", "external_id": "15550001@s.whatsapp.net"}
//! {"type": "response", "request_id": "...", "ok": true, "external_message_id": "...", "timestamp": "..."}
//! ```
//!
//! Tether -> Sidecar:
//! ```json
//! {"type": "open", "account_id": "...", "session_id": "..."}
//! {"type": "send_message", "request_id": "...", "idempotency_key": "...", "conversation_id": "...", "payload": {}}
//! {"type": "logout"}
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tether_core::types::SendReceipt;
use tether_core::{ProtocolEvent, SendError};

/// Command sent to the sidecar.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    /// Start the handshake for one session.
    Open {
        account_id: String,
        session_id: String,
    },
    SendMessage {
        request_id: String,
        idempotency_key: String,
        conversation_id: String,
        payload: serde_json::Value,
    },
    /// Revoke the pairing.
    Logout,
}

/// The sidecar's answer to a [`Command::SendMessage`].
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct CommandResponse {
    pub request_id: String,
    pub ok: bool,
    #[serde(default)]
    pub external_message_id: Option<String>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub error: Option<String>,
    /// Whether a failed send may succeed on retry.
    #[serde(default)]
    pub retryable: bool,
}

impl CommandResponse {
    /// Classify the response as a receipt or a send error.
    pub fn into_result(self) -> Result<SendReceipt, SendError> {
        if !self.ok {
            let reason = self.error.unwrap_or_else(|| "send rejected".to_string());
            return Err(if self.retryable {
                SendError::Transient(reason)
            } else {
                SendError::Permanent(reason)
            });
        }
        let Some(external_message_id) = self.external_message_id else {
            return Err(SendError::Permanent(
                "sidecar acknowledged send without a message id".to_string(),
            ));
        };
        Ok(SendReceipt {
            external_message_id,
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
        })
    }
}

/// A decoded sidecar frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Event(ProtocolEvent),
    Response(CommandResponse),
}

/// Decode one text frame. Responses carry `"type": "response"`; every other
/// type must be a [`ProtocolEvent`].
pub fn decode(text: &str) -> Result<Inbound, serde_json::Error> {
    let value: serde_json::Value = serde_json::from_str(text)?;
    if value.get("type").and_then(|t| t.as_str()) == Some("response") {
        serde_json::from_value(value).map(Inbound::Response)
    } else {
        serde_json::from_value(value).map(Inbound::Event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_are_tagged() {
        let open = Command::Open {
            account_id: "a".into(),
            session_id: "s".into(),
        };
        let json = serde_json::to_value(&open).unwrap();
        assert_eq!(json["type"], "open");
        assert_eq!(json["session_id"], "s");
        let json = serde_json::to_string(&Command::Logout).unwrap();
        assert_eq!(json, r#"{"type":"logout"}"#);
    }

    #[test]
    fn decodes_lifecycle_and_content_events() {
        let frame = r#"{"type":"connected","external_id":"1@s.whatsapp.net"}"#;
        assert_eq!(
            decode(frame).unwrap(),
            Inbound::Event(ProtocolEvent::Connected {
                external_id: "1@s.whatsapp.net".into()
            })
        );
        let frame = r#"{"type":"logged_out"}"#;
        assert_eq!(
            decode(frame).unwrap(),
            Inbound::Event(ProtocolEvent::LoggedOut { reason: None })
        );
        let frame = r#"{"type":"pair_timeout"}"#;
        assert_eq!(decode(frame).unwrap(), Inbound::Event(ProtocolEvent::PairTimeout));
    }

    #[test]
    fn decodes_responses() {
        let frame = r#"{"type":"response","request_id":"r1","ok":true,"external_message_id":"X1"}"#;
        let Inbound::Response(response) = decode(frame).unwrap() else {
            panic!("expected response");
        };
        assert_eq!(response.request_id, "r1");
        assert_eq!(response.into_result().unwrap().external_message_id, "X1");
    }

    #[test]
    fn unknown_frame_type_is_an_error() {
        assert!(decode(r#"{"type":"mystery"}"#).is_err());
        assert!(decode("not json").is_err());
    }

    #[test]
    fn failed_responses_classify_by_retryable() {
        let response = CommandResponse {
            request_id: "r".into(),
            ok: false,
            external_message_id: None,
            timestamp: None,
            error: Some("rate limited".into()),
            retryable: true,
        };
        assert_eq!(
            response.clone().into_result(),
            Err(SendError::Transient("rate limited".into()))
        );
        let permanent = CommandResponse {
            retryable: false,
            error: Some("no such chat".into()),
            ..response
        };
        assert_eq!(
            permanent.into_result(),
            Err(SendError::Permanent("no such chat".into()))
        );
    }
}
