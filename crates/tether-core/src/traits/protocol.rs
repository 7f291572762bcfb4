// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Seam to the external platform's wire-protocol client library.
//!
//! The library performs the actual handshake bytes. Tether only sees a client
//! handle for outbound operations and a channel of [`ProtocolEvent`]s.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::{SendError, TetherError};
use crate::traits::adapter::PluginAdapter;
use crate::types::{ProtocolEvent, SendReceipt};

/// An outbound chat message handed to the protocol client.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    /// Idempotency key of the originating outbox entry.
    pub idempotency_key: String,
    pub conversation_id: String,
    pub payload: serde_json::Value,
}

/// A freshly opened protocol connection.
///
/// The handshake is already running when this is returned; its progress
/// arrives on `events`.
pub struct ProtocolSession {
    pub client: Arc<dyn ProtocolClient>,
    pub events: mpsc::Receiver<ProtocolEvent>,
}

impl std::fmt::Debug for ProtocolSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolSession").finish_non_exhaustive()
    }
}

/// Opens connections to one external integration.
#[async_trait]
pub trait ProtocolConnector: PluginAdapter {
    /// Integration type this connector serves (e.g. "whatsapp").
    fn integration(&self) -> &str;

    /// Opens a client for `account_id` and starts the pairing handshake.
    ///
    /// Errors returned here happen before any pairing code exists and are
    /// surfaced to the `connect` caller.
    async fn open(&self, account_id: &str, session_id: &str)
    -> Result<ProtocolSession, TetherError>;
}

/// A live client connection for one session.
#[async_trait]
pub trait ProtocolClient: Send + Sync + 'static {
    /// Sends a message, classifying failures as transient or permanent.
    async fn send_message(&self, message: &OutboundMessage) -> Result<SendReceipt, SendError>;

    /// Closes the transport but keeps the pairing valid.
    async fn disconnect(&self) -> Result<(), TetherError>;

    /// Revokes the pairing and closes the transport.
    async fn logout(&self) -> Result<(), TetherError>;
}
