// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Seam between the outbox worker and whatever owns live clients.

use async_trait::async_trait;

use crate::error::SendError;
use crate::types::{OutboxEntry, SendReceipt};

/// Performs the external side effect for one outbox entry.
#[async_trait]
pub trait OutboundSender: Send + Sync + 'static {
    async fn send(&self, entry: &OutboxEntry) -> Result<SendReceipt, SendError>;
}
