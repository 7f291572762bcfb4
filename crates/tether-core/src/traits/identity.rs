// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Seam to credential verification.

use async_trait::async_trait;

use crate::error::TetherError;

/// Resolves a bearer credential to the caller's account id.
#[async_trait]
pub trait IdentityVerifier: Send + Sync + 'static {
    /// Returns the account id, or [`TetherError::Unauthorized`].
    async fn verify(&self, token: &str) -> Result<String, TetherError>;
}
