// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Bridge connector for external messaging platforms.
//!
//! The platform protocol itself runs in a sidecar process; this crate talks
//! to it over a JSON WebSocket protocol (see [`frames`]) and exposes it as a
//! [`ProtocolConnector`](tether_core::ProtocolConnector).

pub mod connector;
pub mod frames;

pub use connector::{BridgeClient, BridgeConnector, BridgeSettings};
