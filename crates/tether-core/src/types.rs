// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Common types shared by the session manager, storage, sync, and gateway.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Health status reported by adapter health checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    /// Adapter is fully operational.
    Healthy,
    /// Adapter is operational but experiencing issues.
    Degraded(String),
    /// Adapter is not operational.
    Unhealthy(String),
}

/// Identifies the kind of adapter behind a [`PluginAdapter`](crate::PluginAdapter).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
pub enum AdapterType {
    Storage,
    Connector,
    Gateway,
}

// --- External sessions ---

/// Lifecycle state of an external-platform session.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Allocated, handshake not yet started.
    Unauthenticated,
    /// Handshake running, waiting for the user to scan the pairing code.
    Pairing,
    /// Paired and online.
    Connected,
    /// Paired but the transport dropped; recoverable until reaped.
    Disconnected,
    /// Pairing code lapsed or a disconnected session outlived its TTL.
    Expired,
    /// Handshake or transport failed irrecoverably.
    Error,
    /// The user unlinked the device or asked for a disconnect.
    LoggedOut,
}

impl SessionStatus {
    /// Terminal states release the (account, integration) slot.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionStatus::Expired | SessionStatus::Error | SessionStatus::LoggedOut
        )
    }

    /// SQL list of non-terminal states, used by the partial unique index and lookups.
    pub const NON_TERMINAL_SQL: &'static str =
        "('unauthenticated', 'pairing', 'connected', 'disconnected')";
}

/// A session against the external platform, as persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalSession {
    pub id: String,
    pub account_id: String,
    pub integration: String,
    pub status: SessionStatus,
    /// Identity the platform assigned on successful pairing.
    pub external_identity: Option<String>,
    /// Failure reason for `error`, or the last disconnect reason.
    pub reason: Option<String>,
    pub pairing_expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub connected_at: Option<DateTime<Utc>>,
    pub disconnected_at: Option<DateTime<Utc>>,
    pub last_activity_at: DateTime<Utc>,
}

/// A pairing code handed to the user to authorize a new linked session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairingCode {
    pub code: String,
    pub expires_at: DateTime<Utc>,
}

/// Result of a successful `connect` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectResponse {
    pub session_id: String,
    pub pairing_code: String,
    pub expires_at: DateTime<Utc>,
}

/// Result of a `status` query for an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStatusReport {
    pub connected: bool,
    pub session_id: Option<String>,
    pub status: Option<SessionStatus>,
    pub external_identity: Option<String>,
    pub last_seen: Option<DateTime<Utc>>,
    pub reason: Option<String>,
}

/// Result of a `disconnect` call. Unknown ids are not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectOutcome {
    Disconnected,
    Unknown,
}

// --- Protocol events ---

/// Media attached to a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub id: String,
    pub mime_type: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub size_bytes: Option<i64>,
}

/// A chat message observed on the external platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncomingMessage {
    /// Platform-assigned message id.
    pub id: String,
    pub conversation_id: String,
    pub sender: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub attachment: Option<Attachment>,
    #[serde(default)]
    pub from_me: bool,
    pub timestamp: DateTime<Utc>,
}

/// Delivery or read receipt for a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub message_id: String,
    pub conversation_id: String,
    pub status: String,
    pub timestamp: DateTime<Utc>,
}

/// Availability change for a contact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Presence {
    pub contact_id: String,
    pub available: bool,
    pub timestamp: DateTime<Utc>,
}

/// Contact card change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactUpdate {
    pub contact_id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Group metadata change (subject, membership).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupUpdate {
    pub conversation_id: String,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub participants: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

/// Every event the external protocol client can deliver.
///
/// Lifecycle variants mutate session state; content variants are appended to
/// the event log. Adding a variant forces every dispatcher match to be revisited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProtocolEvent {
    /// A (possibly refreshed) pairing code is ready to show to the user.
    PairingCode {
        code: String,
        expires_at: DateTime<Utc>,
    },
    /// The handshake deadline passed without a scan.
    PairTimeout,
    /// The handshake failed.
    PairError { reason: String },
    /// Handshake succeeded or the transport came back.
    Connected { external_id: String },
    /// Transport dropped; the pairing is still valid.
    Disconnected {
        #[serde(default)]
        reason: Option<String>,
    },
    /// The platform revoked the pairing.
    LoggedOut {
        #[serde(default)]
        reason: Option<String>,
    },
    Message(IncomingMessage),
    Receipt(Receipt),
    Presence(Presence),
    ContactUpdate(ContactUpdate),
    GroupUpdate(GroupUpdate),
}

impl ProtocolEvent {
    /// Short name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ProtocolEvent::PairingCode { .. } => "pairing_code",
            ProtocolEvent::PairTimeout => "pair_timeout",
            ProtocolEvent::PairError { .. } => "pair_error",
            ProtocolEvent::Connected { .. } => "connected",
            ProtocolEvent::Disconnected { .. } => "disconnected",
            ProtocolEvent::LoggedOut { .. } => "logged_out",
            ProtocolEvent::Message(_) => "message",
            ProtocolEvent::Receipt(_) => "receipt",
            ProtocolEvent::Presence(_) => "presence",
            ProtocolEvent::ContactUpdate(_) => "contact_update",
            ProtocolEvent::GroupUpdate(_) => "group_update",
        }
    }
}

// --- Event log ---

/// Type tag of a logged event.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Connected,
    Disconnected,
    LoggedOut,
    MessageReceived,
    MessageSent,
    Receipt,
    Presence,
    ContactUpdated,
    GroupUpdated,
}

/// An event about to be appended. `id` is the producer's idempotency key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewEvent {
    pub id: String,
    pub event_type: EventType,
    pub account_id: String,
    pub conversation_id: Option<String>,
    pub external_message_id: Option<String>,
    pub payload: serde_json::Value,
    pub attachment_ref: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// An immutable, sequenced event from the log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub seq: i64,
    pub id: String,
    pub event_type: EventType,
    pub account_id: String,
    pub conversation_id: Option<String>,
    pub external_message_id: Option<String>,
    pub payload: serde_json::Value,
    pub attachment_ref: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Result of an append. Duplicates report the seq of the original row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Appended(i64),
    Duplicate(i64),
}

impl AppendOutcome {
    pub fn seq(self) -> i64 {
        match self {
            AppendOutcome::Appended(seq) | AppendOutcome::Duplicate(seq) => seq,
        }
    }

    pub fn is_duplicate(self) -> bool {
        matches!(self, AppendOutcome::Duplicate(_))
    }
}

// --- Outbox ---

/// Progress of an outbound action.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum OutboxStatus {
    Queued,
    Sending,
    Sent,
    Failed,
    Retry,
}

impl OutboxStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, OutboxStatus::Sent | OutboxStatus::Failed)
    }
}

/// A durable outbound action keyed by the caller's idempotency key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxEntry {
    pub idempotency_key: String,
    pub account_id: String,
    pub conversation_id: String,
    pub payload: serde_json::Value,
    pub status: OutboxStatus,
    pub event_seq: Option<i64>,
    pub last_error: Option<String>,
    pub retry_count: i64,
    pub next_attempt_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Result of an enqueue. `created == false` means the key was already used
/// and `entry` is the prior record, unmodified.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnqueueOutcome {
    pub entry: OutboxEntry,
    pub created: bool,
}

/// What the platform returned for a successful send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendReceipt {
    pub external_message_id: String,
    pub timestamp: DateTime<Utc>,
}

// --- Sync ---

/// Replicated tables a client can pull.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Events,
    Conversations,
    Messages,
    Contacts,
    Participants,
    Media,
}

impl EntityType {
    pub const ALL: [EntityType; 6] = [
        EntityType::Events,
        EntityType::Conversations,
        EntityType::Messages,
        EntityType::Contacts,
        EntityType::Participants,
        EntityType::Media,
    ];

    /// Backing table name. Matches the snake_case tag.
    pub fn table(self) -> &'static str {
        match self {
            EntityType::Events => "events",
            EntityType::Conversations => "conversations",
            EntityType::Messages => "messages",
            EntityType::Contacts => "contacts",
            EntityType::Participants => "participants",
            EntityType::Media => "media",
        }
    }
}

/// One replicated row: stable identity plus the cursor column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRow {
    pub seq: i64,
    pub id: String,
    pub data: serde_json::Value,
}

/// A page returned by Pull. `rows` is strictly ascending by seq; empty means caught up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncPage {
    pub entity_type: EntityType,
    pub rows: Vec<SyncRow>,
    /// Cursor the client should hold after applying this page.
    pub cursor: i64,
    pub has_more: bool,
}

// --- Notifications ---

/// Ephemeral "new seq available" hint for an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub account_id: String,
    pub seq: i64,
}
