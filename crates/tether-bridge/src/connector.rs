// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Protocol connector that drives sessions through a bridge sidecar.
//!
//! Every session gets its own WebSocket to the sidecar. The connection is
//! split: a reader task decodes frames into [`ProtocolEvent`]s (and routes
//! command responses to their waiting callers) while the write half is
//! shared by the client methods. When the socket ends, the event stream
//! closes and the session manager sees the transport as gone.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use tether_config::model::{BridgeConfig, SessionConfig};
use tether_core::types::{AdapterType, HealthStatus, SendReceipt};
use tether_core::{
    OutboundMessage, PluginAdapter, ProtocolClient, ProtocolConnector, ProtocolEvent,
    ProtocolSession, SendError, TetherError,
};

use crate::frames::{Command, CommandResponse, Inbound, decode};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Pending = Arc<Mutex<HashMap<String, oneshot::Sender<CommandResponse>>>>;

/// Connection settings for the sidecar.
#[derive(Debug, Clone)]
pub struct BridgeSettings {
    pub url: String,
    pub integration: String,
    pub connect_timeout: Duration,
    /// How long a send waits for the sidecar's response.
    pub request_timeout: Duration,
    /// Capacity of each session's event channel.
    pub event_buffer: usize,
}

impl BridgeSettings {
    pub fn new(bridge: &BridgeConfig, session: &SessionConfig) -> Self {
        Self {
            url: bridge.url.clone(),
            integration: session.integration.clone(),
            connect_timeout: Duration::from_secs(bridge.connect_timeout_secs),
            request_timeout: Duration::from_secs(30),
            event_buffer: session.event_buffer.max(1),
        }
    }
}

/// Connector for an external platform reached through a sidecar.
#[derive(Debug)]
pub struct BridgeConnector {
    settings: BridgeSettings,
}

impl BridgeConnector {
    pub fn new(settings: BridgeSettings) -> Self {
        Self { settings }
    }

    async fn dial(&self) -> Result<WsStream, TetherError> {
        let url = self.settings.url.as_str();
        let connect = tokio_tungstenite::connect_async(url);
        match tokio::time::timeout(self.settings.connect_timeout, connect).await {
            Ok(Ok((stream, _response))) => Ok(stream),
            Ok(Err(e)) => Err(TetherError::Protocol {
                message: format!("failed to reach bridge at {url}"),
                source: Some(Box::new(e)),
            }),
            Err(_) => Err(TetherError::Timeout {
                duration: self.settings.connect_timeout,
            }),
        }
    }
}

#[async_trait]
impl PluginAdapter for BridgeConnector {
    fn name(&self) -> &str {
        "bridge"
    }

    fn version(&self) -> semver::Version {
        semver::Version::parse(env!("CARGO_PKG_VERSION")).unwrap_or(semver::Version::new(0, 1, 0))
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Connector
    }

    async fn health_check(&self) -> Result<HealthStatus, TetherError> {
        match self.dial().await {
            Ok(mut stream) => {
                let _ = stream.close(None).await;
                Ok(HealthStatus::Healthy)
            }
            Err(e) => Ok(HealthStatus::Unhealthy(e.to_string())),
        }
    }

    async fn shutdown(&self) -> Result<(), TetherError> {
        Ok(())
    }
}

#[async_trait]
impl ProtocolConnector for BridgeConnector {
    fn integration(&self) -> &str {
        &self.settings.integration
    }

    async fn open(
        &self,
        account_id: &str,
        session_id: &str,
    ) -> Result<ProtocolSession, TetherError> {
        let stream = self.dial().await?;
        let (mut writer, reader) = stream.split();

        let open = Command::Open {
            account_id: account_id.to_string(),
            session_id: session_id.to_string(),
        };
        send_command(&mut writer, &open)
            .await
            .map_err(|e| TetherError::Protocol {
                message: "failed to start handshake".to_string(),
                source: Some(Box::new(e)),
            })?;

        let (events_tx, events_rx) = mpsc::channel(self.settings.event_buffer);
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let reader_task = tokio::spawn(read_frames(
            reader,
            events_tx,
            Arc::clone(&pending),
            session_id.to_string(),
        ));
        info!(session_id, account_id, "bridge session opened");

        let client = Arc::new(BridgeClient {
            session_id: session_id.to_string(),
            writer: Mutex::new(Some(writer)),
            pending,
            reader_task: Mutex::new(Some(reader_task)),
            request_timeout: self.settings.request_timeout,
        });
        Ok(ProtocolSession {
            client,
            events: events_rx,
        })
    }
}

async fn send_command(
    writer: &mut SplitSink<WsStream, Message>,
    command: &Command,
) -> Result<(), tokio_tungstenite::tungstenite::Error> {
    let json = match serde_json::to_string(command) {
        Ok(json) => json,
        Err(e) => {
            return Err(tokio_tungstenite::tungstenite::Error::Io(
                std::io::Error::other(e),
            ));
        }
    };
    writer.send(Message::Text(json.into())).await
}

/// Decode sidecar frames until the socket ends. Dropping `events` on exit
/// tells the session the transport is gone; dropping the pending senders
/// fails any in-flight sends.
async fn read_frames(
    mut reader: SplitStream<WsStream>,
    events: mpsc::Sender<ProtocolEvent>,
    pending: Pending,
    session_id: String,
) {
    while let Some(frame) = reader.next().await {
        match frame {
            Ok(Message::Text(text)) => match decode(text.as_str()) {
                Ok(Inbound::Event(event)) => {
                    if events.send(event).await.is_err() {
                        debug!(session_id = %session_id, "session stopped listening");
                        break;
                    }
                }
                Ok(Inbound::Response(response)) => {
                    let waiter = pending.lock().await.remove(&response.request_id);
                    match waiter {
                        Some(tx) => {
                            let _ = tx.send(response);
                        }
                        None => {
                            debug!(session_id = %session_id, request_id = %response.request_id, "response without a waiting request");
                        }
                    }
                }
                Err(e) => warn!(session_id = %session_id, error = %e, "skipping malformed bridge frame"),
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "bridge read error");
                break;
            }
        }
    }
    pending.lock().await.clear();
    debug!(session_id = %session_id, "bridge stream ended");
}

/// Client half of one bridge session.
pub struct BridgeClient {
    session_id: String,
    writer: Mutex<Option<SplitSink<WsStream, Message>>>,
    pending: Pending,
    reader_task: Mutex<Option<JoinHandle<()>>>,
    request_timeout: Duration,
}

impl std::fmt::Debug for BridgeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeClient")
            .field("session_id", &self.session_id)
            .finish_non_exhaustive()
    }
}

impl BridgeClient {
    /// Close the socket and stop the reader.
    async fn close(&self) {
        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.send(Message::Close(None)).await;
            let _ = writer.close().await;
        }
        if let Some(task) = self.reader_task.lock().await.take() {
            task.abort();
        }
        self.pending.lock().await.clear();
    }
}

#[async_trait]
impl ProtocolClient for BridgeClient {
    async fn send_message(&self, message: &OutboundMessage) -> Result<SendReceipt, SendError> {
        let request_id = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(request_id.clone(), tx);

        let command = Command::SendMessage {
            request_id: request_id.clone(),
            idempotency_key: message.idempotency_key.clone(),
            conversation_id: message.conversation_id.clone(),
            payload: message.payload.clone(),
        };
        let sent = {
            let mut guard = self.writer.lock().await;
            match guard.as_mut() {
                Some(writer) => send_command(writer, &command).await.map_err(|e| e.to_string()),
                None => Err("bridge connection closed".to_string()),
            }
        };
        if let Err(reason) = sent {
            self.pending.lock().await.remove(&request_id);
            return Err(SendError::Transient(reason));
        }

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(response)) => response.into_result(),
            Ok(Err(_)) => Err(SendError::Transient("bridge connection lost".to_string())),
            Err(_) => {
                self.pending.lock().await.remove(&request_id);
                Err(SendError::Transient(format!(
                    "no response from bridge within {:?}",
                    self.request_timeout
                )))
            }
        }
    }

    async fn disconnect(&self) -> Result<(), TetherError> {
        self.close().await;
        debug!(session_id = %self.session_id, "bridge session disconnected");
        Ok(())
    }

    async fn logout(&self) -> Result<(), TetherError> {
        let result = {
            let mut guard = self.writer.lock().await;
            match guard.as_mut() {
                Some(writer) => send_command(writer, &Command::Logout).await,
                None => Ok(()),
            }
        };
        self.close().await;
        result.map_err(|e| TetherError::Protocol {
            message: "failed to send logout".to_string(),
            source: Some(Box::new(e)),
        })
    }
}
