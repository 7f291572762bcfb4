// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Typed query modules. Every function takes `&Database` and runs its SQL
//! on the single writer thread.

pub mod entities;
pub mod events;
pub mod outbox;
pub mod sessions;
