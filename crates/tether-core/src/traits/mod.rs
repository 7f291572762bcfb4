// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Trait seams between Tether crates and their external collaborators.
//!
//! Async traits use `#[async_trait]` for dynamic dispatch compatibility.

pub mod adapter;
pub mod identity;
pub mod notifier;
pub mod outbound;
pub mod protocol;

pub use adapter::PluginAdapter;
pub use identity::IdentityVerifier;
pub use notifier::{ChangeNotifier, NoopNotifier};
pub use outbound::OutboundSender;
pub use protocol::{OutboundMessage, ProtocolClient, ProtocolConnector, ProtocolSession};
