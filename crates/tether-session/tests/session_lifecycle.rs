// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end session lifecycle tests over the mock platform.

use std::time::Duration;

use chrono::Utc;
use tether_core::types::{DisconnectOutcome, IncomingMessage, Presence};
use tether_core::{EntityType, EventType, OutboundSender, ProtocolEvent, SessionStatus, TetherError};
use tether_storage::queries::{entities, events, sessions};
use tether_test_utils::{TestHarness, eventually, pairing_code};

const WAIT: Duration = Duration::from_secs(2);

fn incoming(id: &str, conversation_id: &str, text: &str) -> ProtocolEvent {
    ProtocolEvent::Message(IncomingMessage {
        id: id.into(),
        conversation_id: conversation_id.into(),
        sender: "15550001@s.whatsapp.net".into(),
        text: Some(text.into()),
        attachment: None,
        from_me: false,
        timestamp: Utc::now(),
    })
}

async fn status_is(harness: &TestHarness, account: &str, expected: SessionStatus) -> bool {
    eventually(WAIT, || async {
        harness
            .manager
            .status(account)
            .await
            .map(|report| report.status == Some(expected))
            .unwrap_or(false)
    })
    .await
}

/// Connect `account` and drive the session to `connected`.
async fn connect_and_pair(harness: &TestHarness, account: &str) -> String {
    let response = harness.manager.connect(account).await.unwrap();
    let links = harness.connector.links().await;
    let link = links
        .iter()
        .find(|l| l.session_id == response.session_id)
        .unwrap();
    link.emit(ProtocolEvent::Connected {
        external_id: format!("{account}@s.whatsapp.net"),
    })
    .await;
    assert!(status_is(harness, account, SessionStatus::Connected).await);
    response.session_id
}

#[tokio::test]
async fn connect_returns_pairing_code() {
    let harness = TestHarness::with_pairing_code("2@ABC").await.unwrap();
    let response = harness.manager.connect("acct-1").await.unwrap();
    assert_eq!(response.pairing_code, "2@ABC");
    assert!(response.expires_at > Utc::now());

    let report = harness.manager.status("acct-1").await.unwrap();
    assert_eq!(report.session_id.as_deref(), Some(response.session_id.as_str()));
    assert_eq!(report.status, Some(SessionStatus::Pairing));
    assert!(!report.connected);
    assert_eq!(harness.manager.live_count().await, 1);
}

#[tokio::test]
async fn second_connect_conflicts_until_disconnect() {
    let harness = TestHarness::with_pairing_code("2@ABC").await.unwrap();
    let first = harness.manager.connect("acct-1").await.unwrap();

    match harness.manager.connect("acct-1").await {
        Err(TetherError::Conflict { session_id, .. }) => assert_eq!(session_id, first.session_id),
        other => panic!("expected conflict, got {other:?}"),
    }
    assert_eq!(harness.connector.open_count().await, 1);

    let outcome = harness.manager.disconnect(&first.session_id).await.unwrap();
    assert_eq!(outcome, DisconnectOutcome::Disconnected);
    let link = &harness.connector.links().await[0];
    assert_eq!(link.client.logout_count(), 1);

    let second = harness.manager.connect("acct-1").await.unwrap();
    assert_ne!(second.session_id, first.session_id);

    let old = sessions::get_session(&harness.db, &first.session_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(old.status, SessionStatus::LoggedOut);
}

#[tokio::test]
async fn accounts_do_not_conflict() {
    let harness = TestHarness::with_pairing_code("2@ABC").await.unwrap();
    harness.manager.connect("acct-1").await.unwrap();
    harness.manager.connect("acct-2").await.unwrap();
    assert_eq!(harness.manager.live_count().await, 2);
}

#[tokio::test]
async fn connect_times_out_but_handshake_continues() {
    let harness = TestHarness::builder()
        .with_pairing_wait(Duration::from_millis(100))
        .build()
        .await
        .unwrap();

    let err = harness.manager.connect("acct-1").await.unwrap_err();
    assert!(matches!(err, TetherError::Timeout { .. }), "got {err:?}");

    let report = harness.manager.status("acct-1").await.unwrap();
    assert_eq!(report.status, Some(SessionStatus::Pairing));

    // A late code still advances the live session.
    let link = &harness.connector.links().await[0];
    link.emit(pairing_code("LATE")).await;
    link.emit(ProtocolEvent::Connected {
        external_id: "late@s.whatsapp.net".into(),
    })
    .await;
    assert!(status_is(&harness, "acct-1", SessionStatus::Connected).await);
}

#[tokio::test]
async fn pre_code_error_is_returned_to_caller() {
    let harness = TestHarness::builder()
        .with_script(vec![ProtocolEvent::PairError {
            reason: "device limit reached".into(),
        }])
        .build()
        .await
        .unwrap();

    let err = harness.manager.connect("acct-1").await.unwrap_err();
    assert!(err.to_string().contains("device limit reached"), "got {err}");

    assert!(status_is(&harness, "acct-1", SessionStatus::Error).await);
    let report = harness.manager.status("acct-1").await.unwrap();
    assert_eq!(report.reason.as_deref(), Some("device limit reached"));
    assert_eq!(harness.manager.live_count().await, 0);
}

#[tokio::test]
async fn open_failure_releases_the_slot() {
    let harness = TestHarness::with_pairing_code("2@ABC").await.unwrap();
    harness
        .connector
        .fail_next_open(TetherError::protocol("platform unreachable"))
        .await;

    assert!(harness.manager.connect("acct-1").await.is_err());
    let report = harness.manager.status("acct-1").await.unwrap();
    assert_eq!(report.status, Some(SessionStatus::Error));

    assert!(harness.manager.connect("acct-1").await.is_ok());
}

#[tokio::test]
async fn post_code_error_is_recorded_on_status() {
    let harness = TestHarness::with_pairing_code("2@ABC").await.unwrap();
    harness.manager.connect("acct-1").await.unwrap();

    let link = &harness.connector.links().await[0];
    link.emit(ProtocolEvent::PairError {
        reason: "stream replaced".into(),
    })
    .await;

    assert!(status_is(&harness, "acct-1", SessionStatus::Error).await);
    let report = harness.manager.status("acct-1").await.unwrap();
    assert_eq!(report.reason.as_deref(), Some("stream replaced"));
    assert_eq!(link.client.disconnect_count(), 1);
}

#[tokio::test]
async fn pair_timeout_expires_the_session() {
    let harness = TestHarness::with_pairing_code("2@ABC").await.unwrap();
    harness.manager.connect("acct-1").await.unwrap();
    harness.connector.links().await[0]
        .emit(ProtocolEvent::PairTimeout)
        .await;
    assert!(status_is(&harness, "acct-1", SessionStatus::Expired).await);
    assert!(harness.manager.connect("acct-1").await.is_ok());
}

#[tokio::test]
async fn connected_session_records_content_and_notifies() {
    let harness = TestHarness::with_pairing_code("2@ABC").await.unwrap();
    let mut sub = harness.hub.subscribe("acct-1");
    let session_id = connect_and_pair(&harness, "acct-1").await;

    let report = harness.manager.status("acct-1").await.unwrap();
    assert!(report.connected);
    assert_eq!(report.external_identity.as_deref(), Some("acct-1@s.whatsapp.net"));

    // The connected lifecycle event is first in the log.
    assert_eq!(sub.recv().await.unwrap().seq, 1);

    let link = harness
        .connector
        .links()
        .await
        .into_iter()
        .find(|l| l.session_id == session_id)
        .unwrap();
    link.emit(incoming("M1", "c1", "hello")).await;
    assert_eq!(sub.recv().await.unwrap().seq, 2);

    // A replay of the same platform message is deduplicated silently.
    link.emit(incoming("M1", "c1", "hello")).await;
    link.emit(ProtocolEvent::Presence(Presence {
        contact_id: "15550001@s.whatsapp.net".into(),
        available: true,
        timestamp: Utc::now(),
    }))
    .await;
    assert_eq!(sub.recv().await.unwrap().seq, 3);

    let log = events::events_after(&harness.db, "acct-1", None, 0, 100)
        .await
        .unwrap();
    let kinds: Vec<EventType> = log.iter().map(|e| e.event_type).collect();
    assert_eq!(
        kinds,
        vec![EventType::Connected, EventType::MessageReceived, EventType::Presence]
    );

    let row = entities::get_entity(&harness.db, "acct-1", EntityType::Messages, "c1:M1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.data["text"], "hello");
    assert_eq!(row.data["status"], "received");
}

#[tokio::test]
async fn transport_drop_then_eviction_after_ttl() {
    let harness = TestHarness::builder()
        .with_script(vec![pairing_code("2@ABC")])
        .with_disconnected_ttl(Duration::from_secs(30))
        .build()
        .await
        .unwrap();
    connect_and_pair(&harness, "acct-1").await;

    let link = &harness.connector.links().await[0];
    link.emit(ProtocolEvent::Disconnected {
        reason: Some("network".into()),
    })
    .await;
    assert!(status_is(&harness, "acct-1", SessionStatus::Disconnected).await);

    // Still inside the TTL: nothing happens.
    let report = harness.manager.sweep_once(Utc::now()).await;
    assert_eq!(report.evicted, 0);
    assert_eq!(harness.manager.live_count().await, 1);

    let later = Utc::now() + chrono::Duration::seconds(31);
    let report = harness.manager.sweep_once(later).await;
    assert_eq!(report.evicted, 1);
    assert_eq!(harness.manager.live_count().await, 0);
    assert_eq!(link.client.disconnect_count(), 1);

    let report = harness.manager.status("acct-1").await.unwrap();
    assert_eq!(report.status, Some(SessionStatus::Expired));
}

#[tokio::test]
async fn sweep_expires_unscanned_pairing() {
    let harness = TestHarness::with_pairing_code("2@ABC").await.unwrap();
    let response = harness.manager.connect("acct-1").await.unwrap();

    let report = harness.manager.sweep_once(Utc::now()).await;
    assert_eq!(report.expired, 0);

    let report = harness
        .manager
        .sweep_once(response.expires_at + chrono::Duration::seconds(1))
        .await;
    assert_eq!(report.expired, 1);

    let report = harness.manager.status("acct-1").await.unwrap();
    assert_eq!(report.status, Some(SessionStatus::Expired));
    assert_eq!(report.reason.as_deref(), Some("pairing code expired"));
    assert!(harness.manager.connect("acct-1").await.is_ok());
}

#[tokio::test]
async fn platform_logout_ends_the_session() {
    let harness = TestHarness::with_pairing_code("2@ABC").await.unwrap();
    connect_and_pair(&harness, "acct-1").await;

    harness.connector.links().await[0]
        .emit(ProtocolEvent::LoggedOut { reason: None })
        .await;
    assert!(status_is(&harness, "acct-1", SessionStatus::LoggedOut).await);
    assert_eq!(harness.manager.live_count().await, 0);

    let log = events::events_after(&harness.db, "acct-1", None, 0, 100)
        .await
        .unwrap();
    assert_eq!(log.last().unwrap().event_type, EventType::LoggedOut);
}

#[tokio::test]
async fn closed_stream_during_pairing_is_an_error() {
    let harness = TestHarness::with_pairing_code("2@ABC").await.unwrap();
    harness.manager.connect("acct-1").await.unwrap();
    harness.connector.links().await[0].close().await;
    assert!(status_is(&harness, "acct-1", SessionStatus::Error).await);
}

#[tokio::test]
async fn disconnect_unknown_session_is_a_noop() {
    let harness = TestHarness::new().await.unwrap();
    let outcome = harness.manager.disconnect("no-such-session").await.unwrap();
    assert_eq!(outcome, DisconnectOutcome::Unknown);
}

#[tokio::test]
async fn status_for_unknown_account_is_empty() {
    let harness = TestHarness::new().await.unwrap();
    let report = harness.manager.status("nobody").await.unwrap();
    assert!(!report.connected);
    assert!(report.session_id.is_none());
    assert!(report.status.is_none());
}

#[tokio::test]
async fn shutdown_then_restart_expires_orphans() {
    let harness = TestHarness::with_pairing_code("2@ABC").await.unwrap();
    connect_and_pair(&harness, "acct-1").await;

    harness.manager.shutdown().await;
    assert_eq!(harness.manager.live_count().await, 0);
    let report = harness.manager.status("acct-1").await.unwrap();
    assert_eq!(report.status, Some(SessionStatus::Disconnected));

    assert_eq!(harness.manager.recover_orphans().await.unwrap(), 1);
    let report = harness.manager.status("acct-1").await.unwrap();
    assert_eq!(report.status, Some(SessionStatus::Expired));
    assert_eq!(report.reason.as_deref(), Some("process restarted"));
}

#[tokio::test]
async fn send_without_connected_session_is_transient() {
    let harness = TestHarness::with_pairing_code("2@ABC").await.unwrap();
    harness.manager.connect("acct-1").await.unwrap();

    let entry = tether_core::OutboxEntry {
        idempotency_key: "k1".into(),
        account_id: "acct-1".into(),
        conversation_id: "c1".into(),
        payload: serde_json::json!({"text": "hi"}),
        status: tether_core::OutboxStatus::Sending,
        event_seq: None,
        last_error: None,
        retry_count: 0,
        next_attempt_at: Utc::now(),
        created_at: Utc::now(),
        updated_at: Utc::now(),
    };
    let err = harness.manager.send(&entry).await.unwrap_err();
    assert!(err.is_retryable());
}

/// Aborts every append of platform message `M1` until dropped.
const FAIL_M1: &str = "CREATE TEMP TRIGGER fail_m1 BEFORE INSERT ON events \
     WHEN NEW.external_message_id = 'M1' \
     BEGIN SELECT RAISE(ABORT, 'disk unavailable'); END;";

async fn execute(harness: &TestHarness, sql: &'static str) {
    harness
        .db
        .connection()
        .call(move |conn| conn.execute_batch(sql))
        .await
        .unwrap();
}

async fn message_ids(harness: &TestHarness, account: &str) -> Vec<String> {
    events::events_after(&harness.db, account, None, 0, 100)
        .await
        .unwrap()
        .into_iter()
        .filter(|e| e.event_type == EventType::MessageReceived)
        .filter_map(|e| e.external_message_id)
        .collect()
}

#[tokio::test]
async fn failed_append_is_retried_before_later_events() {
    let harness = TestHarness::with_pairing_code("2@ABC").await.unwrap();
    let session_id = connect_and_pair(&harness, "acct-1").await;
    let link = harness
        .connector
        .links()
        .await
        .into_iter()
        .find(|l| l.session_id == session_id)
        .unwrap();

    execute(&harness, FAIL_M1).await;
    link.emit(incoming("M1", "c1", "first")).await;
    link.emit(incoming("M2", "c1", "second")).await;
    tokio::time::sleep(Duration::from_millis(150)).await;
    // M2 waits behind M1 while the log is unavailable.
    assert!(message_ids(&harness, "acct-1").await.is_empty());

    execute(&harness, "DROP TRIGGER fail_m1").await;
    assert!(
        eventually(Duration::from_secs(5), || async {
            message_ids(&harness, "acct-1").await.len() == 2
        })
        .await
    );
    assert_eq!(message_ids(&harness, "acct-1").await, ["M1", "M2"]);

    let report = harness.manager.status("acct-1").await.unwrap();
    assert_eq!(report.status, Some(SessionStatus::Connected));
}

#[tokio::test]
async fn append_that_never_lands_fails_the_session() {
    let harness = TestHarness::with_pairing_code("2@ABC").await.unwrap();
    let session_id = connect_and_pair(&harness, "acct-1").await;
    let link = harness
        .connector
        .links()
        .await
        .into_iter()
        .find(|l| l.session_id == session_id)
        .unwrap();

    execute(&harness, FAIL_M1).await;
    link.emit(incoming("M1", "c1", "first")).await;
    link.emit(incoming("M2", "c1", "second")).await;

    assert!(
        eventually(Duration::from_secs(5), || async {
            harness
                .manager
                .status("acct-1")
                .await
                .map(|report| report.status == Some(SessionStatus::Error))
                .unwrap_or(false)
        })
        .await
    );
    let report = harness.manager.status("acct-1").await.unwrap();
    assert!(
        report
            .reason
            .as_deref()
            .is_some_and(|r| r.starts_with("event log unavailable")),
        "reason: {:?}",
        report.reason
    );

    // Nothing after the lost event was recorded; the platform redelivers
    // both on the next connect.
    assert!(message_ids(&harness, "acct-1").await.is_empty());
    assert_eq!(link.client.disconnect_count(), 1);
    assert_eq!(harness.manager.live_count().await, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn connected_event_racing_disconnect_stays_logged_out() {
    let harness = TestHarness::with_pairing_code("2@ABC").await.unwrap();

    for round in 0..25 {
        let response = harness.manager.connect("acct-1").await.unwrap();
        let link = harness
            .connector
            .links()
            .await
            .into_iter()
            .find(|l| l.session_id == response.session_id)
            .unwrap();

        let connected = ProtocolEvent::Connected {
            external_id: format!("{round}@s.whatsapp.net"),
        };
        let (_, outcome) = tokio::join!(
            link.emit(connected),
            harness.manager.disconnect(&response.session_id)
        );
        assert_eq!(outcome.unwrap(), DisconnectOutcome::Disconnected);

        tokio::time::sleep(Duration::from_millis(20)).await;
        let row = sessions::get_session(&harness.db, &response.session_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.status, SessionStatus::LoggedOut, "round {round}");
        assert_eq!(harness.manager.live_count().await, 0);
    }
}

#[tokio::test]
async fn sweep_spares_a_session_that_reconnected() {
    let harness = TestHarness::builder()
        .with_script(vec![pairing_code("2@ABC")])
        .with_disconnected_ttl(Duration::from_secs(30))
        .build()
        .await
        .unwrap();
    connect_and_pair(&harness, "acct-1").await;

    let link = &harness.connector.links().await[0];
    link.emit(ProtocolEvent::Disconnected { reason: None }).await;
    assert!(status_is(&harness, "acct-1", SessionStatus::Disconnected).await);
    link.emit(ProtocolEvent::Connected {
        external_id: "acct-1@s.whatsapp.net".into(),
    })
    .await;
    assert!(status_is(&harness, "acct-1", SessionStatus::Connected).await);

    let later = Utc::now() + chrono::Duration::seconds(31);
    assert_eq!(harness.manager.sweep_once(later).await.evicted, 0);
    assert_eq!(harness.manager.live_count().await, 1);
}
