// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Realtime notification channel.
//!
//! Server -> Client (JSON):
//! ```json
//! {"type": "notification", "nextSeq": 42}
//! {"type": "ping"}
//! ```
//!
//! Client -> Server (JSON):
//! ```json
//! {"type": "pong"}
//! ```
//!
//! WebSocket Pong frames count as a heartbeat too. A client whose queue
//! overflows is closed with code 1008 and is expected to reconnect and pull
//! from its saved cursor.

use std::time::Instant;

use axum::{
    Extension,
    body::Bytes,
    extract::{
        State,
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade, close_code},
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::time::{MissedTickBehavior, interval_at};

use crate::auth::Account;
use crate::server::GatewayState;

/// Close code sent to clients dropped for falling behind.
pub const SLOW_CONSUMER_CODE: u16 = close_code::POLICY;

/// Server -> client frame.
#[derive(Debug, Serialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Notification {
        #[serde(rename = "nextSeq")]
        next_seq: i64,
    },
    Ping,
}

/// Client -> server frame.
#[derive(Debug, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientFrame {
    Pong,
}

/// GET /v1/realtime
///
/// Upgrades to WebSocket and subscribes to the caller's account topic.
pub async fn realtime_handler(
    ws: WebSocketUpgrade,
    State(state): State<GatewayState>,
    Extension(Account(account_id)): Extension<Account>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state, account_id))
}

fn close(code: u16, reason: &'static str) -> Message {
    Message::Close(Some(CloseFrame {
        code,
        reason: reason.into(),
    }))
}

fn text(frame: &ServerFrame) -> Option<Message> {
    match serde_json::to_string(frame) {
        Ok(json) => Some(Message::Text(json.into())),
        Err(e) => {
            tracing::error!(error = %e, "failed to encode realtime frame");
            None
        }
    }
}

/// Handle one realtime connection until the client leaves, falls behind,
/// stops answering heartbeats, or the server shuts down.
async fn handle_socket(socket: WebSocket, state: GatewayState, account_id: String) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let mut sub = state.hub.subscribe(&account_id);
    let settings = state.realtime;
    let mut heartbeat = interval_at(
        tokio::time::Instant::now() + settings.heartbeat_interval,
        settings.heartbeat_interval,
    );
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_seen = Instant::now();

    metrics::gauge!("tether_realtime_connections").increment(1.0);
    tracing::debug!(account_id = %account_id, "realtime client connected");

    let goodbye = loop {
        tokio::select! {
            biased;
            _ = state.cancel.cancelled() => break Some(close(close_code::AWAY, "server shutdown")),
            next = sub.recv() => match next {
                Some(notification) => {
                    let frame = ServerFrame::Notification { next_seq: notification.seq };
                    let Some(msg) = text(&frame) else { continue };
                    if ws_sender.send(msg).await.is_err() {
                        break None;
                    }
                }
                None if sub.is_overflowed() => {
                    tracing::info!(account_id = %account_id, "closing slow realtime client");
                    metrics::counter!("tether_realtime_slow_consumer_total").increment(1);
                    break Some(close(SLOW_CONSUMER_CODE, "slow consumer"));
                }
                None => break Some(close(close_code::AWAY, "server shutdown")),
            },
            incoming = ws_receiver.next() => match incoming {
                Some(Ok(Message::Pong(_))) => last_seen = Instant::now(),
                Some(Ok(Message::Text(body))) => {
                    let body: &str = &body;
                    match serde_json::from_str::<ClientFrame>(body) {
                        Ok(ClientFrame::Pong) => last_seen = Instant::now(),
                        Err(e) => tracing::debug!("ignoring realtime client frame: {e}"),
                    }
                }
                Some(Ok(Message::Close(_))) | None => break None,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(error = %e, "realtime socket error");
                    break None;
                }
            },
            _ = heartbeat.tick() => {
                if last_seen.elapsed() > settings.heartbeat_timeout {
                    tracing::info!(account_id = %account_id, "realtime heartbeat timed out");
                    break Some(close(close_code::AWAY, "heartbeat timeout"));
                }
                let Some(ping) = text(&ServerFrame::Ping) else { continue };
                if ws_sender.send(ping).await.is_err()
                    || ws_sender.send(Message::Ping(Bytes::new())).await.is_err()
                {
                    break None;
                }
            }
        }
    };

    // Unsubscribe before the close handshake.
    drop(sub);
    if let Some(frame) = goodbye {
        let _ = ws_sender.send(frame).await;
    }
    let _ = ws_sender.close().await;
    metrics::gauge!("tether_realtime_connections").decrement(1.0);
    tracing::debug!(account_id = %account_id, "realtime client disconnected");
}
