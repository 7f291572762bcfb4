// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Mock protocol connector for deterministic testing.
//!
//! `MockConnector` implements `ProtocolConnector` without any network. Each
//! `open()` produces a [`MockLink`] through which a test injects protocol
//! events, and a [`MockClient`] that captures outbound sends.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, Notify, mpsc};

use tether_core::types::SendReceipt;
use tether_core::{
    AdapterType, HealthStatus, OutboundMessage, PluginAdapter, ProtocolClient,
    ProtocolConnector, ProtocolEvent, ProtocolSession, SendError, TetherError,
};

type SendScript = Arc<Mutex<VecDeque<Result<SendReceipt, SendError>>>>;

/// A mock external platform.
///
/// Events listed with [`with_script`](Self::with_script) are emitted on
/// every newly opened link before `open()` returns.
pub struct MockConnector {
    script: Vec<ProtocolEvent>,
    open_failures: Mutex<VecDeque<TetherError>>,
    send_script: SendScript,
    links: Mutex<Vec<Arc<MockLink>>>,
    opened: Notify,
    buffer: usize,
}

impl MockConnector {
    /// Create a connector with no scripted events.
    pub fn new() -> Self {
        Self {
            script: Vec::new(),
            open_failures: Mutex::new(VecDeque::new()),
            send_script: Arc::new(Mutex::new(VecDeque::new())),
            links: Mutex::new(Vec::new()),
            opened: Notify::new(),
            buffer: 64,
        }
    }

    /// Emit `events` on every link as soon as it opens.
    pub fn with_script(mut self, events: Vec<ProtocolEvent>) -> Self {
        self.script = events;
        self
    }

    /// Make the next `open()` fail with `err`.
    pub async fn fail_next_open(&self, err: TetherError) {
        self.open_failures.lock().await.push_back(err);
    }

    /// Queue the result of a future `send_message` on any client.
    /// Unscripted sends succeed.
    pub async fn queue_send_result(&self, result: Result<SendReceipt, SendError>) {
        self.send_script.lock().await.push_back(result);
    }

    /// Every link opened so far, oldest first.
    pub async fn links(&self) -> Vec<Arc<MockLink>> {
        self.links.lock().await.clone()
    }

    /// Number of successful `open()` calls.
    pub async fn open_count(&self) -> usize {
        self.links.lock().await.len()
    }

    /// Wait until at least `n` links have been opened.
    pub async fn wait_for_links(&self, n: usize) -> Vec<Arc<MockLink>> {
        loop {
            let notified = self.opened.notified();
            {
                let links = self.links.lock().await;
                if links.len() >= n {
                    return links.clone();
                }
            }
            notified.await;
        }
    }
}

impl Default for MockConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PluginAdapter for MockConnector {
    fn name(&self) -> &str {
        "mock-connector"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Connector
    }

    async fn health_check(&self) -> Result<HealthStatus, TetherError> {
        Ok(HealthStatus::Healthy)
    }

    async fn shutdown(&self) -> Result<(), TetherError> {
        Ok(())
    }
}

#[async_trait]
impl ProtocolConnector for MockConnector {
    fn integration(&self) -> &str {
        "mock"
    }

    async fn open(
        &self,
        account_id: &str,
        session_id: &str,
    ) -> Result<ProtocolSession, TetherError> {
        if let Some(err) = self.open_failures.lock().await.pop_front() {
            return Err(err);
        }

        let (tx, rx) = mpsc::channel(self.buffer);
        for event in &self.script {
            tx.send(event.clone())
                .await
                .map_err(|e| TetherError::Internal(e.to_string()))?;
        }

        let client = Arc::new(MockClient::new(Arc::clone(&self.send_script)));
        let link = Arc::new(MockLink {
            account_id: account_id.to_string(),
            session_id: session_id.to_string(),
            events: Mutex::new(Some(tx)),
            client: Arc::clone(&client),
        });
        self.links.lock().await.push(link);
        self.opened.notify_waiters();

        Ok(ProtocolSession {
            client,
            events: rx,
        })
    }
}

/// The test's end of one opened connection.
pub struct MockLink {
    pub account_id: String,
    pub session_id: String,
    events: Mutex<Option<mpsc::Sender<ProtocolEvent>>>,
    pub client: Arc<MockClient>,
}

impl MockLink {
    /// Deliver a protocol event to the session's dispatcher.
    pub async fn emit(&self, event: ProtocolEvent) {
        let tx = self.events.lock().await.clone();
        if let Some(tx) = tx {
            // The dispatcher may already have stopped; tests assert on state.
            let _ = tx.send(event).await;
        }
    }

    /// Close the event channel without a terminal event.
    pub async fn close(&self) {
        self.events.lock().await.take();
    }
}

/// Mock protocol client capturing outbound messages.
pub struct MockClient {
    sent: Mutex<Vec<OutboundMessage>>,
    send_script: SendScript,
    disconnects: AtomicUsize,
    logouts: AtomicUsize,
}

impl MockClient {
    fn new(send_script: SendScript) -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            send_script,
            disconnects: AtomicUsize::new(0),
            logouts: AtomicUsize::new(0),
        }
    }

    /// Messages that reached `send_message`, including failed attempts.
    pub async fn sent_messages(&self) -> Vec<OutboundMessage> {
        self.sent.lock().await.clone()
    }

    pub fn disconnect_count(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    pub fn logout_count(&self) -> usize {
        self.logouts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProtocolClient for MockClient {
    async fn send_message(&self, message: &OutboundMessage) -> Result<SendReceipt, SendError> {
        let attempt = {
            let mut sent = self.sent.lock().await;
            sent.push(message.clone());
            sent.len()
        };
        match self.send_script.lock().await.pop_front() {
            Some(result) => result,
            None => Ok(SendReceipt {
                external_message_id: format!("ext-{}-{attempt}", message.idempotency_key),
                timestamp: Utc::now(),
            }),
        }
    }

    async fn disconnect(&self) -> Result<(), TetherError> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn logout(&self) -> Result<(), TetherError> {
        self.logouts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
