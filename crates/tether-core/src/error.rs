// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for the Tether session bridge.

use thiserror::Error;

/// The primary error type used across all Tether crates.
#[derive(Debug, Error)]
pub enum TetherError {
    /// Configuration errors (invalid TOML, missing required fields, type mismatches).
    #[error("configuration error: {0}")]
    Config(String),

    /// Storage backend errors. Appends that fail with this are never retried
    /// internally; the caller decides.
    #[error("storage error: {source}")]
    Storage {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// External protocol errors (handshake failure, transport loss, bad frame).
    #[error("protocol error: {message}")]
    Protocol {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A non-terminal session already exists for the account and integration.
    #[error("session {session_id} is already active for this account")]
    Conflict {
        session_id: String,
        external_identity: Option<String>,
    },

    /// Operation timed out (e.g. no pairing code within the bounded wait).
    #[error("operation timed out after {duration:?}")]
    Timeout { duration: std::time::Duration },

    /// A referenced record does not exist.
    #[error("{kind} not found: {id}")]
    NotFound { kind: String, id: String },

    /// Caller supplied an unusable argument.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Caller could not be authenticated.
    #[error("unauthorized")]
    Unauthorized,

    /// Internal or unexpected errors.
    #[error("internal error: {0}")]
    Internal(String),
}

impl TetherError {
    /// Shorthand for a protocol error without an underlying source.
    pub fn protocol(message: impl Into<String>) -> Self {
        TetherError::Protocol {
            message: message.into(),
            source: None,
        }
    }
}

/// Outcome of a failed outbound send, as classified by the protocol client.
///
/// Send errors stay inside the outbox: they are recorded on the entry and
/// never propagated to sessions or other entries.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SendError {
    /// Retryable failure (no live session, transport hiccup, rate limit).
    #[error("transient send failure: {0}")]
    Transient(String),

    /// Failure that no retry will fix (invalid recipient, rejected payload).
    #[error("permanent send failure: {0}")]
    Permanent(String),
}

impl SendError {
    /// Whether the outbox may schedule another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SendError::Transient(_))
    }
}
