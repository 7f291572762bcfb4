// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Gateway HTTP server built on axum.
//!
//! Sets up routes, middleware, and shared state for the gateway.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router, middleware as axum_middleware,
    routing::{delete, get, post},
};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use tether_bus::NotificationHub;
use tether_config::model::NotifyConfig;
use tether_core::TetherError;
use tether_session::SessionManager;
use tether_storage::Database;
use tether_sync::SyncService;

use crate::auth::{AuthState, auth_middleware};
use crate::handlers;
use crate::ws;

/// Heartbeat timings for realtime connections.
#[derive(Debug, Clone, Copy)]
pub struct RealtimeSettings {
    pub heartbeat_interval: Duration,
    /// Silence after which a client is closed.
    pub heartbeat_timeout: Duration,
}

impl From<&NotifyConfig> for RealtimeSettings {
    fn from(config: &NotifyConfig) -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(config.heartbeat_interval_secs.max(1)),
            heartbeat_timeout: Duration::from_secs(config.heartbeat_timeout_secs.max(1)),
        }
    }
}

/// Shared state for axum request handlers.
#[derive(Clone)]
pub struct GatewayState {
    pub manager: SessionManager,
    pub sync: Arc<SyncService>,
    pub db: Database,
    /// Fan-out hub realtime connections subscribe to.
    pub hub: NotificationHub,
    pub realtime: RealtimeSettings,
    /// Process start time for uptime calculation.
    pub start_time: std::time::Instant,
    /// Cancelled on shutdown; open realtime sockets close when it fires.
    pub cancel: CancellationToken,
}

/// Build the gateway router.
///
/// Public: `GET /health`. Everything under `/v1` requires a credential,
/// including the realtime socket (which may pass it as `access_token`).
pub fn router(state: GatewayState, auth: AuthState) -> Router {
    let public_routes = Router::new()
        .route("/health", get(handlers::get_health))
        .with_state(state.clone());

    let api_routes = Router::new()
        .route("/v1/sessions/connect", post(handlers::post_connect))
        .route("/v1/sessions/status", get(handlers::get_status))
        .route("/v1/sessions/{id}", delete(handlers::delete_session))
        .route("/v1/sync/{entity_type}", get(handlers::get_sync))
        .route("/v1/outbox", post(handlers::post_outbox))
        .route("/v1/outbox/{key}", get(handlers::get_outbox))
        .route("/v1/realtime", get(ws::realtime_handler))
        .route_layer(axum_middleware::from_fn_with_state(auth, auth_middleware))
        .with_state(state);

    Router::new()
        .merge(public_routes)
        .merge(api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Bind `host:port` and serve `app` until `cancel` fires.
pub async fn start_server(
    host: &str,
    port: u16,
    app: Router,
    cancel: CancellationToken,
) -> Result<(), TetherError> {
    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| TetherError::Internal(format!("failed to bind gateway to {addr}: {e}")))?;

    tracing::info!("Gateway server listening on {addr}");
    serve(listener, app, cancel).await
}

/// Serve on an already bound listener. Used directly by tests binding port 0.
pub async fn serve(
    listener: tokio::net::TcpListener,
    app: Router,
    cancel: CancellationToken,
) -> Result<(), TetherError> {
    axum::serve(listener, app)
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await
        .map_err(|e| TetherError::Internal(format!("gateway server error: {e}")))?;
    tracing::info!("gateway stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn realtime_settings_from_config() {
        let config = NotifyConfig {
            queue_capacity: 8,
            heartbeat_interval_secs: 15,
            heartbeat_timeout_secs: 45,
        };
        let settings = RealtimeSettings::from(&config);
        assert_eq!(settings.heartbeat_interval, Duration::from_secs(15));
        assert_eq!(settings.heartbeat_timeout, Duration::from_secs(45));
    }

    #[test]
    fn zero_intervals_are_clamped() {
        let config = NotifyConfig {
            queue_capacity: 8,
            heartbeat_interval_secs: 0,
            heartbeat_timeout_secs: 0,
        };
        let settings = RealtimeSettings::from(&config);
        assert_eq!(settings.heartbeat_interval, Duration::from_secs(1));
    }
}
