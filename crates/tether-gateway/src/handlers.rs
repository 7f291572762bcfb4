// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP request handlers for the gateway REST API.
//!
//! Every authenticated handler acts on the caller's [`Account`] only.

use std::str::FromStr;

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

use tether_core::types::DisconnectOutcome;
use tether_core::{EntityType, TetherError};
use tether_storage::queries::outbox;

use crate::auth::Account;
use crate::server::GatewayState;

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error description.
    pub error: String,
    /// Existing session on a connect conflict.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_identity: Option<String>,
}

/// A [`TetherError`] rendered as an HTTP response.
#[derive(Debug)]
pub struct ApiError(pub TetherError);

impl From<TetherError> for ApiError {
    fn from(err: TetherError) -> Self {
        Self(err)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            TetherError::Conflict { .. } => StatusCode::CONFLICT,
            TetherError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            TetherError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            TetherError::NotFound { .. } => StatusCode::NOT_FOUND,
            TetherError::Unauthorized => StatusCode::UNAUTHORIZED,
            TetherError::Protocol { .. } => StatusCode::BAD_GATEWAY,
            TetherError::Config(_) | TetherError::Storage { .. } | TetherError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        }
        let (session_id, external_identity) = match &self.0 {
            TetherError::Conflict {
                session_id,
                external_identity,
            } => (Some(session_id.clone()), external_identity.clone()),
            _ => (None, None),
        };
        let body = ErrorResponse {
            error: self.0.to_string(),
            session_id,
            external_identity,
        };
        (status, Json(body)).into_response()
    }
}

/// Response body for GET /health.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    /// Sessions holding a live protocol client.
    pub live_sessions: usize,
}

/// Response body for DELETE /v1/sessions/{id}.
#[derive(Debug, Serialize)]
pub struct DisconnectResponse {
    pub session_id: String,
    /// `disconnected`, or `unknown` for an id this server never issued.
    pub outcome: &'static str,
}

/// Query string of GET /v1/sync/{entity_type}.
#[derive(Debug, Deserialize)]
pub struct PullParams {
    #[serde(default)]
    pub since: i64,
    #[serde(default)]
    pub limit: Option<u32>,
}

/// Request body for POST /v1/outbox.
#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    pub idempotency_key: String,
    pub conversation_id: String,
    pub payload: serde_json::Value,
}

/// GET /health
pub async fn get_health(State(state): State<GatewayState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        live_sessions: state.manager.live_count().await,
    })
}

/// POST /v1/sessions/connect
///
/// Starts pairing and returns the code, or 409 with the active session.
pub async fn post_connect(
    State(state): State<GatewayState>,
    Extension(Account(account_id)): Extension<Account>,
) -> Result<Response, ApiError> {
    let response = state.manager.connect(&account_id).await?;
    Ok((StatusCode::OK, Json(response)).into_response())
}

/// GET /v1/sessions/status
pub async fn get_status(
    State(state): State<GatewayState>,
    Extension(Account(account_id)): Extension<Account>,
) -> Result<Response, ApiError> {
    let report = state.manager.status(&account_id).await?;
    Ok(Json(report).into_response())
}

/// DELETE /v1/sessions/{id}
///
/// Idempotent. Sessions of other accounts look unknown.
pub async fn delete_session(
    State(state): State<GatewayState>,
    Extension(Account(account_id)): Extension<Account>,
    Path(session_id): Path<String>,
) -> Result<Response, ApiError> {
    let owned = state
        .manager
        .session(&session_id)
        .await?
        .is_some_and(|s| s.account_id == account_id);
    let outcome = if owned {
        state.manager.disconnect(&session_id).await?
    } else {
        DisconnectOutcome::Unknown
    };
    let outcome = match outcome {
        DisconnectOutcome::Disconnected => "disconnected",
        DisconnectOutcome::Unknown => "unknown",
    };
    Ok(Json(DisconnectResponse {
        session_id,
        outcome,
    })
    .into_response())
}

/// GET /v1/sync/{entity_type}?since=&limit=
pub async fn get_sync(
    State(state): State<GatewayState>,
    Extension(Account(account_id)): Extension<Account>,
    Path(entity_type): Path<String>,
    Query(params): Query<PullParams>,
) -> Result<Response, ApiError> {
    let entity = EntityType::from_str(&entity_type).map_err(|_| {
        TetherError::InvalidInput(format!("unknown entity type: {entity_type}"))
    })?;
    let page = state
        .sync
        .pull(&account_id, entity, params.since, params.limit)
        .await?;
    Ok(Json(page).into_response())
}

/// POST /v1/outbox
///
/// 202 for a new entry, 200 with the prior entry when the key was already used.
pub async fn post_outbox(
    State(state): State<GatewayState>,
    Extension(Account(account_id)): Extension<Account>,
    Json(body): Json<SubmitRequest>,
) -> Result<Response, ApiError> {
    let outcome = outbox::enqueue(
        &state.db,
        &body.idempotency_key,
        &account_id,
        &body.conversation_id,
        &body.payload,
        chrono::Utc::now(),
    )
    .await?;
    let status = if outcome.created {
        StatusCode::ACCEPTED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(outcome.entry)).into_response())
}

/// GET /v1/outbox/{key}
pub async fn get_outbox(
    State(state): State<GatewayState>,
    Extension(Account(account_id)): Extension<Account>,
    Path(key): Path<String>,
) -> Result<Response, ApiError> {
    match outbox::get(&state.db, &key).await? {
        Some(entry) if entry.account_id == account_id => Ok(Json(entry).into_response()),
        _ => Err(TetherError::NotFound {
            kind: "outbox entry".into(),
            id: key,
        }
        .into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_statuses() {
        let conflict = ApiError(TetherError::Conflict {
            session_id: "s1".into(),
            external_identity: None,
        });
        assert_eq!(conflict.status(), StatusCode::CONFLICT);
        let timeout = ApiError(TetherError::Timeout {
            duration: std::time::Duration::from_secs(30),
        });
        assert_eq!(timeout.status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(
            ApiError(TetherError::InvalidInput("x".into())).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError(TetherError::Internal("x".into())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn conflict_body_carries_existing_session() {
        let body = ErrorResponse {
            error: "conflict".into(),
            session_id: Some("s1".into()),
            external_identity: Some("123@s.whatsapp.net".into()),
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["session_id"], "s1");
        assert_eq!(json["external_identity"], "123@s.whatsapp.net");

        let plain = ErrorResponse {
            error: "bad".into(),
            session_id: None,
            external_identity: None,
        };
        let json = serde_json::to_string(&plain).unwrap();
        assert!(!json.contains("session_id"));
    }

    #[test]
    fn pull_params_default_to_start() {
        let params: PullParams = serde_json::from_str("{}").unwrap();
        assert_eq!(params.since, 0);
        assert!(params.limit.is_none());
    }
}
