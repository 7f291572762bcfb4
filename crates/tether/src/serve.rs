// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `tether serve` command implementation.
//!
//! Wires storage, the notification hub, the bridge connector, the session
//! manager, the outbox worker, and the gateway together, then runs until
//! SIGINT/SIGTERM. On shutdown live clients are disconnected (not logged
//! out) so they can resume after restart.

use std::sync::Arc;

use tether_bridge::{BridgeConnector, BridgeSettings};
use tether_bus::NotificationHub;
use tether_config::TetherConfig;
use tether_core::TetherError;
use tether_gateway::{Gateway, GatewayState, RealtimeSettings, StaticTokenVerifier};
use tether_session::shutdown;
use tether_session::{OutboxWorker, SessionManager, SessionSettings};
use tether_storage::SqliteStorage;
use tether_sync::SyncService;
use tracing::{info, warn};

/// Runs the `tether serve` command.
pub async fn run_serve(config: TetherConfig) -> Result<(), TetherError> {
    init_tracing(&config.server.log_level);

    info!("starting tether serve");
    if config.gateway.tokens.is_empty() {
        warn!("gateway.tokens is empty; every authenticated request will be rejected");
    }

    // Initialize storage.
    let storage = SqliteStorage::new(config.storage.clone());
    storage.initialize().await?;
    let db = storage.database()?;

    let cancel = shutdown::install_signal_handler();
    let hub = NotificationHub::new(config.notify.queue_capacity);
    let connector = Arc::new(BridgeConnector::new(BridgeSettings::new(
        &config.bridge,
        &config.session,
    )));

    let manager = SessionManager::new(
        db.clone(),
        connector,
        Arc::new(hub.clone()),
        SessionSettings::from(&config.session),
    );

    // Sessions left non-terminal by a previous process can never resume.
    manager.recover_orphans().await?;

    let sweeper = manager.spawn_sweeper(cancel.clone());

    let worker = OutboxWorker::new(
        db.clone(),
        Arc::new(manager.clone()),
        Arc::new(hub.clone()),
        &config.outbox,
    );
    let worker_handle = tokio::spawn(worker.run(cancel.clone()));

    let state = GatewayState {
        manager: manager.clone(),
        sync: Arc::new(SyncService::new(db.clone(), &config.sync)),
        db: db.clone(),
        hub: hub.clone(),
        realtime: RealtimeSettings::from(&config.notify),
        start_time: std::time::Instant::now(),
        cancel: cancel.clone(),
    };
    let verifier = StaticTokenVerifier::new(config.gateway.tokens.clone());
    let gateway = Gateway::new(state, Arc::new(verifier));

    let served = gateway.run(&config.server.host, config.server.port).await;
    // The server also returns early on a bind failure; stop everything else too.
    cancel.cancel();

    manager.shutdown().await;
    hub.close_all();
    if let Err(e) = sweeper.await {
        warn!(error = %e, "sweeper task failed");
    }
    if let Err(e) = worker_handle.await {
        warn!(error = %e, "outbox worker task failed");
    }
    info!("tether stopped");
    served
}

/// Initialize the tracing subscriber with the given log level.
///
/// `RUST_LOG` takes precedence when set.
fn init_tracing(log_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("tether={log_level},warn")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(false)
        .init();
}
