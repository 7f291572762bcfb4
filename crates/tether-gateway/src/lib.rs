// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP/WebSocket gateway for the Tether session bridge.
//!
//! Exposes session pairing, status and disconnect, cursor pulls, outbox
//! submission, and the per-account realtime notification channel. Every
//! route except `/health` is scoped to the account resolved from the
//! caller's credential.

pub mod auth;
pub mod handlers;
pub mod server;
pub mod ws;

use std::sync::Arc;

use axum::Router;

use tether_core::{IdentityVerifier, TetherError};

use crate::auth::AuthState;
pub use crate::auth::{Account, StaticTokenVerifier};
pub use crate::handlers::ApiError;
pub use crate::server::{GatewayState, RealtimeSettings};

/// The gateway: shared state plus the credential verifier.
pub struct Gateway {
    state: GatewayState,
    auth: AuthState,
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("realtime", &self.state.realtime)
            .finish_non_exhaustive()
    }
}

impl Gateway {
    pub fn new(state: GatewayState, verifier: Arc<dyn IdentityVerifier>) -> Self {
        Self {
            state,
            auth: AuthState { verifier },
        }
    }

    /// The full route tree, ready to serve or to drive with `tower::ServiceExt`.
    pub fn router(&self) -> Router {
        server::router(self.state.clone(), self.auth.clone())
    }

    /// Serve on `host:port` until the state's cancellation token fires.
    pub async fn run(self, host: &str, port: u16) -> Result<(), TetherError> {
        let app = self.router();
        server::start_server(host, port, app, self.state.cancel.clone()).await
    }
}
