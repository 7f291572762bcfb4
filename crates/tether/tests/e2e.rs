// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end tests for the complete pipeline: pairing over HTTP, inbound
//! content reaching a replica through a realtime hint, and outbound
//! delivery through the outbox.
//!
//! Each test creates an isolated TestHarness with temp SQLite and a mock
//! platform. Tests are independent and order-insensitive.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use chrono::Utc;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use tether_core::types::IncomingMessage;
use tether_core::{EntityType, ProtocolEvent, SessionStatus};
use tether_gateway::{Gateway, GatewayState, RealtimeSettings, StaticTokenVerifier};
use tether_session::OutboxWorker;
use tether_sync::{Replica, SyncService};
use tether_test_utils::{MockLink, TestHarness, eventually};

const WAIT: Duration = Duration::from_secs(3);

struct Stack {
    harness: TestHarness,
    app: Router,
    sync: Arc<SyncService>,
}

impl Stack {
    async fn new() -> Self {
        let harness = TestHarness::with_pairing_code("2@E2E").await.unwrap();
        let sync = Arc::new(SyncService::new(harness.db.clone(), &harness.config.sync));
        let state = GatewayState {
            manager: harness.manager.clone(),
            sync: sync.clone(),
            db: harness.db.clone(),
            hub: harness.hub.clone(),
            realtime: RealtimeSettings::from(&harness.config.notify),
            start_time: std::time::Instant::now(),
            cancel: CancellationToken::new(),
        };
        let verifier = StaticTokenVerifier::new(BTreeMap::from([(
            "tok-a".to_string(),
            "acct-a".to_string(),
        )]));
        let app = Gateway::new(state, Arc::new(verifier)).router();
        Self { harness, app, sync }
    }

    async fn call(&self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("authorization", "Bearer tok-a");
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), 1 << 20)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    /// Pair `acct-a` over HTTP and return the platform side of the session.
    async fn pair(&self) -> Arc<MockLink> {
        let (status, body) = self.call(Method::POST, "/v1/sessions/connect", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["pairing_code"], "2@E2E");
        let session_id = body["session_id"].as_str().unwrap().to_string();

        let link = self
            .harness
            .connector
            .links()
            .await
            .into_iter()
            .find(|l| l.session_id == session_id)
            .unwrap();
        link.emit(ProtocolEvent::Connected {
            external_id: "15550009@s.whatsapp.net".into(),
        })
        .await;
        assert!(
            eventually(WAIT, || async {
                let (_, body) = self.call(Method::GET, "/v1/sessions/status", None).await;
                body["connected"] == json!(true)
            })
            .await
        );
        link
    }
}

fn incoming(id: &str, text: &str) -> ProtocolEvent {
    ProtocolEvent::Message(IncomingMessage {
        id: id.into(),
        conversation_id: "c1".into(),
        sender: "15550001@s.whatsapp.net".into(),
        text: Some(text.into()),
        attachment: None,
        from_me: false,
        timestamp: Utc::now(),
    })
}

#[tokio::test]
async fn inbound_messages_reach_the_replica_through_a_hint() {
    let stack = Stack::new().await;
    let link = stack.pair().await;

    let replica = Replica::open_in_memory("acct-a", stack.sync.clone())
        .await
        .unwrap();
    replica.sync_all().await.unwrap();
    let mut sub = stack.harness.hub.subscribe("acct-a");

    link.emit(incoming("M1", "hello")).await;
    link.emit(incoming("M2", "again")).await;

    let mut synced = 0;
    while replica.row_count(EntityType::Messages).await.unwrap() < 2 {
        let hint = tokio::time::timeout(WAIT, sub.recv()).await.unwrap().unwrap();
        if replica.on_notification(&hint).await.unwrap() {
            synced += 1;
        }
    }
    assert!(synced >= 1);
    let row = replica
        .row(EntityType::Messages, "c1:M2")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.data["text"], "again");

    // The platform redelivering a message changes nothing.
    let cursor = replica.cursor(EntityType::Events).await.unwrap();
    link.emit(incoming("M1", "hello")).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(replica.sync_all().await.unwrap(), 0);
    assert_eq!(replica.cursor(EntityType::Events).await.unwrap(), cursor);
}

#[tokio::test]
async fn outbox_submission_is_delivered_once() {
    let stack = Stack::new().await;
    let link = stack.pair().await;

    let mut outbox_config = stack.harness.config.outbox.clone();
    outbox_config.poll_interval_ms = 20;
    let worker = OutboxWorker::new(
        stack.harness.db.clone(),
        Arc::new(stack.harness.manager.clone()),
        Arc::new(stack.harness.hub.clone()),
        &outbox_config,
    );
    let cancel = CancellationToken::new();
    let worker_handle = tokio::spawn(worker.run(cancel.clone()));

    let request = json!({
        "idempotency_key": "send-1",
        "conversation_id": "c1",
        "payload": {"text": "from the phone"},
    });
    let (status, _) = stack.call(Method::POST, "/v1/outbox", Some(request.clone())).await;
    assert_eq!(status, StatusCode::ACCEPTED);

    assert!(
        eventually(WAIT, || async {
            let (_, body) = stack.call(Method::GET, "/v1/outbox/send-1", None).await;
            body["status"] == json!("sent")
        })
        .await
    );

    // A retried submission after delivery is acknowledged, not resent.
    let (status, body) = stack.call(Method::POST, "/v1/outbox", Some(request)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "sent");
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(link.client.sent_messages().await.len(), 1);

    let (_, page) = stack.call(Method::GET, "/v1/sync/events?since=0", None).await;
    let sent: Vec<&Value> = page["rows"]
        .as_array()
        .unwrap()
        .iter()
        .filter(|row| row["data"]["event_type"] == "message_sent")
        .collect();
    assert_eq!(sent.len(), 1);

    cancel.cancel();
    worker_handle.await.unwrap();
}

#[tokio::test]
async fn restart_expires_sessions_left_behind() {
    let stack = Stack::new().await;
    stack.pair().await;

    stack.harness.manager.shutdown().await;
    let (_, body) = stack.call(Method::GET, "/v1/sessions/status", None).await;
    assert_eq!(body["status"], "disconnected");
    assert_eq!(body["connected"], false);

    // A new process finds the row without a client behind it.
    assert_eq!(stack.harness.manager.recover_orphans().await.unwrap(), 1);
    let report = stack.harness.manager.status("acct-a").await.unwrap();
    assert_eq!(report.status, Some(SessionStatus::Expired));
    assert_eq!(report.reason.as_deref(), Some("process restarted"));
}
