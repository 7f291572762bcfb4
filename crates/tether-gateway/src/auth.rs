// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Authentication middleware for the gateway.
//!
//! Every API and realtime request must carry a credential, either as
//! `Authorization: Bearer <token>` or, for WebSocket clients that cannot set
//! headers, as an `access_token` query parameter. The credential is resolved
//! to an account id by an [`IdentityVerifier`]; handlers only ever act on
//! that account.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};

use tether_core::{IdentityVerifier, TetherError};

/// The authenticated caller, inserted as a request extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account(pub String);

/// Verifier backed by the `[gateway] tokens` table (token -> account id).
pub struct StaticTokenVerifier {
    tokens: BTreeMap<String, String>,
}

impl StaticTokenVerifier {
    pub fn new(tokens: BTreeMap<String, String>) -> Self {
        Self { tokens }
    }
}

impl std::fmt::Debug for StaticTokenVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticTokenVerifier")
            .field("tokens", &format_args!("[{} redacted]", self.tokens.len()))
            .finish()
    }
}

#[async_trait]
impl IdentityVerifier for StaticTokenVerifier {
    async fn verify(&self, token: &str) -> Result<String, TetherError> {
        self.tokens
            .get(token)
            .cloned()
            .ok_or(TetherError::Unauthorized)
    }
}

/// Authentication state for the middleware.
#[derive(Clone)]
pub struct AuthState {
    pub verifier: Arc<dyn IdentityVerifier>,
}

fn bearer_token(request: &Request) -> Option<&str> {
    request
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

fn query_token(request: &Request) -> Option<&str> {
    request
        .uri()
        .query()?
        .split('&')
        .find_map(|pair| pair.strip_prefix("access_token="))
}

/// Middleware that resolves the caller's credential to an [`Account`].
///
/// Missing or unknown credentials are rejected with 401.
pub async fn auth_middleware(
    State(auth): State<AuthState>,
    mut request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let Some(token) = bearer_token(&request)
        .or_else(|| query_token(&request))
        .map(str::to_owned)
    else {
        return Err(StatusCode::UNAUTHORIZED);
    };
    match auth.verifier.verify(&token).await {
        Ok(account_id) => {
            request.extensions_mut().insert(Account(account_id));
            Ok(next.run(request).await)
        }
        Err(TetherError::Unauthorized) => {
            tracing::debug!("rejected unknown credential");
            Err(StatusCode::UNAUTHORIZED)
        }
        Err(e) => {
            tracing::error!(error = %e, "identity verification failed");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}
