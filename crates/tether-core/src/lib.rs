// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core library for the Tether session bridge.
//!
//! Defines the error taxonomy, the domain types that flow between the
//! session manager, the event log, the sync protocol, and the notification
//! fan-out, and the traits at each external seam.

pub mod error;
pub mod traits;
pub mod types;

pub use error::{SendError, TetherError};
pub use types::{
    AdapterType, AppendOutcome, ConnectResponse, DisconnectOutcome, EnqueueOutcome, EntityType,
    Event, EventType, ExternalSession, HealthStatus, NewEvent, Notification, OutboxEntry,
    OutboxStatus, PairingCode, ProtocolEvent, SendReceipt, SessionStatus, SessionStatusReport,
    SyncPage, SyncRow,
};

pub use traits::{
    ChangeNotifier, IdentityVerifier, NoopNotifier, OutboundMessage, OutboundSender,
    PluginAdapter, ProtocolClient, ProtocolConnector, ProtocolSession,
};

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn session_status_terminal_split() {
        let non_terminal = [
            SessionStatus::Unauthenticated,
            SessionStatus::Pairing,
            SessionStatus::Connected,
            SessionStatus::Disconnected,
        ];
        for status in non_terminal {
            assert!(!status.is_terminal(), "{status} should be non-terminal");
            assert!(
                SessionStatus::NON_TERMINAL_SQL.contains(&format!("'{status}'")),
                "{status} missing from NON_TERMINAL_SQL"
            );
        }
        for status in [
            SessionStatus::Expired,
            SessionStatus::Error,
            SessionStatus::LoggedOut,
        ] {
            assert!(status.is_terminal(), "{status} should be terminal");
        }
    }

    #[test]
    fn session_status_uses_snake_case_strings() {
        assert_eq!(SessionStatus::LoggedOut.to_string(), "logged_out");
        assert_eq!(
            SessionStatus::from_str("disconnected").unwrap(),
            SessionStatus::Disconnected
        );
        let json = serde_json::to_string(&SessionStatus::Pairing).unwrap();
        assert_eq!(json, "\"pairing\"");
    }

    #[test]
    fn entity_type_table_matches_tag() {
        for entity in EntityType::ALL {
            assert_eq!(entity.table(), entity.to_string());
            assert_eq!(EntityType::from_str(entity.table()).unwrap(), entity);
        }
        assert!(EntityType::from_str("secrets").is_err());
    }

    #[test]
    fn protocol_event_deserializes_tagged_frames() {
        let frame = r#"{"type":"pairing_code","code":"2@abc","expires_at":"2026-01-01T00:02:00Z"}"#;
        let event: ProtocolEvent = serde_json::from_str(frame).unwrap();
        assert_eq!(event.kind(), "pairing_code");

        let frame = r#"{"type":"message","id":"M1","conversation_id":"c1","sender":"s1","text":"hi","timestamp":"2026-01-01T00:00:00Z"}"#;
        let event: ProtocolEvent = serde_json::from_str(frame).unwrap();
        match event {
            ProtocolEvent::Message(msg) => {
                assert_eq!(msg.id, "M1");
                assert!(!msg.from_me);
                assert!(msg.attachment.is_none());
            }
            other => panic!("expected message, got {other:?}"),
        }

        let event: ProtocolEvent = serde_json::from_str(r#"{"type":"pair_timeout"}"#).unwrap();
        assert_eq!(event, ProtocolEvent::PairTimeout);
    }

    #[test]
    fn append_outcome_reports_seq() {
        assert_eq!(AppendOutcome::Appended(7).seq(), 7);
        assert_eq!(AppendOutcome::Duplicate(3).seq(), 3);
        assert!(AppendOutcome::Duplicate(3).is_duplicate());
        assert!(!AppendOutcome::Appended(7).is_duplicate());
    }

    #[test]
    fn send_error_retryability() {
        assert!(SendError::Transient("offline".into()).is_retryable());
        assert!(!SendError::Permanent("bad jid".into()).is_retryable());
    }

    #[test]
    fn outbox_status_terminal_states() {
        assert!(OutboxStatus::Sent.is_terminal());
        assert!(OutboxStatus::Failed.is_terminal());
        assert!(!OutboxStatus::Retry.is_terminal());
        assert_eq!(OutboxStatus::Retry.to_string(), "retry");
    }

    #[test]
    fn conflict_error_mentions_session() {
        let err = TetherError::Conflict {
            session_id: "sess-1".into(),
            external_identity: Some("123@s.whatsapp.net".into()),
        };
        assert!(err.to_string().contains("sess-1"));
    }

    #[test]
    fn all_seams_are_exported() {
        fn _assert_connector<T: ProtocolConnector>() {}
        fn _assert_client<T: ProtocolClient>() {}
        fn _assert_notifier<T: ChangeNotifier>() {}
        fn _assert_sender<T: OutboundSender>() {}
        fn _assert_verifier<T: IdentityVerifier>() {}
        _assert_notifier::<NoopNotifier>();
    }
}
