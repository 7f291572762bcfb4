// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! External session lifecycle for Tether.
//!
//! - [`SessionManager`] runs the pairing handshake, owns every live protocol
//!   client, and sweeps expired sessions.
//! - Each live session has a dispatcher task that appends the client's
//!   content events to the log and notifies the account.
//! - [`OutboxWorker`] delivers queued outbound actions through the manager.

mod dispatch;
pub mod manager;
pub mod outbox;
pub mod projection;
pub mod shutdown;

pub use manager::{SessionManager, SessionSettings, SweepReport};
pub use outbox::OutboxWorker;
pub use projection::{Projected, message_entity_id};
