// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Seam between event-log writers and the notification fan-out.

/// Receives "new seq available" hints after a successful append.
///
/// Implementations must not block: notifications are a liveliness hint and
/// the cursor protocol recovers anything that is dropped.
pub trait ChangeNotifier: Send + Sync + 'static {
    fn notify(&self, account_id: &str, seq: i64);
}

/// Notifier that drops every hint. Useful when no realtime clients exist.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

impl ChangeNotifier for NoopNotifier {
    fn notify(&self, _account_id: &str, _seq: i64) {}
}
