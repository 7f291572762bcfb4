// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test utilities for Tether integration tests.
//!
//! Provides a mock external platform and a test harness for fast,
//! deterministic, CI-runnable tests without network access.
//!
//! # Components
//!
//! - [`MockConnector`] - Mock protocol connector with event injection per link
//! - [`MockClient`] - Mock protocol client capturing outbound sends
//! - [`TestHarness`] - Session manager, hub, and temp database wired together

pub mod harness;
pub mod mock_connector;

pub use harness::{TestHarness, eventually, pairing_code};
pub use mock_connector::{MockClient, MockConnector, MockLink};
