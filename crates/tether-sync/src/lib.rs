// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Incremental, cursor-based replication.
//!
//! [`SyncService`] answers `Pull(entity, since, limit)` on the server;
//! [`Replica`] is the client that persists cursors, applies pages in order,
//! and catches up when a realtime hint arrives.

pub mod replica;
pub mod service;

pub use replica::Replica;
pub use service::{PullSource, SyncService};
