// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration model structs for the Tether session bridge.
//!
//! All structs use `#[serde(deny_unknown_fields)]` to reject unrecognized
//! config keys at startup, providing actionable error messages.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level Tether configuration.
///
/// Loaded from TOML files following XDG hierarchy, with environment variable overrides.
/// All sections are optional and default to sensible values.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct TetherConfig {
    /// HTTP/WebSocket listener and logging.
    #[serde(default)]
    pub server: ServerConfig,

    /// Storage backend settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// External session lifecycle settings.
    #[serde(default)]
    pub session: SessionConfig,

    /// Outbound delivery queue settings.
    #[serde(default)]
    pub outbox: OutboxConfig,

    /// Realtime notification fan-out settings.
    #[serde(default)]
    pub notify: NotifyConfig,

    /// Cursor sync settings.
    #[serde(default)]
    pub sync: SyncConfig,

    /// Gateway authentication settings.
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// External platform bridge settings.
    #[serde(default)]
    pub bridge: BridgeConfig,
}

/// Listener and logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Host address to bind.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to bind.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Logging level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8640
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Storage backend configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Enable WAL (Write-Ahead Logging) mode for SQLite.
    #[serde(default = "default_wal_mode")]
    pub wal_mode: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            wal_mode: default_wal_mode(),
        }
    }
}

fn default_database_path() -> String {
    dirs::data_dir()
        .map(|p| p.join("tether").join("tether.db"))
        .unwrap_or_else(|| std::path::PathBuf::from("tether.db"))
        .to_string_lossy()
        .into_owned()
}

fn default_wal_mode() -> bool {
    true
}

/// External session lifecycle configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SessionConfig {
    /// Integration type handled by the configured connector.
    #[serde(default = "default_integration")]
    pub integration: String,

    /// How long `connect` waits for the first pairing code.
    #[serde(default = "default_pairing_wait_secs")]
    pub pairing_wait_secs: u64,

    /// Lifetime of a pairing code when the protocol does not report one.
    #[serde(default = "default_pairing_code_ttl_secs")]
    pub pairing_code_ttl_secs: u64,

    /// How long a disconnected session keeps its in-memory client.
    #[serde(default = "default_disconnected_ttl_secs")]
    pub disconnected_ttl_secs: u64,

    /// Interval of the background sweep.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Capacity of the channel between a protocol client and its dispatcher.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            integration: default_integration(),
            pairing_wait_secs: default_pairing_wait_secs(),
            pairing_code_ttl_secs: default_pairing_code_ttl_secs(),
            disconnected_ttl_secs: default_disconnected_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            event_buffer: default_event_buffer(),
        }
    }
}

impl SessionConfig {
    pub fn pairing_wait(&self) -> Duration {
        Duration::from_secs(self.pairing_wait_secs)
    }

    pub fn pairing_code_ttl(&self) -> Duration {
        Duration::from_secs(self.pairing_code_ttl_secs)
    }

    pub fn disconnected_ttl(&self) -> Duration {
        Duration::from_secs(self.disconnected_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

fn default_integration() -> String {
    "whatsapp".to_string()
}

fn default_pairing_wait_secs() -> u64 {
    30
}

fn default_pairing_code_ttl_secs() -> u64 {
    120
}

fn default_disconnected_ttl_secs() -> u64 {
    30 * 60
}

fn default_sweep_interval_secs() -> u64 {
    60
}

fn default_event_buffer() -> usize {
    256
}

/// Outbound delivery queue configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct OutboxConfig {
    /// Delay between polls when the queue is idle.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Maximum entries claimed per poll.
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,

    /// Attempts after which an entry is marked failed.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Backoff before the first retry; doubles per attempt.
    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,

    /// Upper bound on the retry backoff.
    #[serde(default = "default_max_backoff_secs")]
    pub max_backoff_secs: u64,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            base_backoff_ms: default_base_backoff_ms(),
            max_backoff_secs: default_max_backoff_secs(),
        }
    }
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_batch_size() -> u32 {
    16
}

fn default_max_retries() -> u32 {
    5
}

fn default_base_backoff_ms() -> u64 {
    1000
}

fn default_max_backoff_secs() -> u64 {
    300
}

/// Realtime notification configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct NotifyConfig {
    /// Per-client outbound queue capacity before the client is dropped.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Interval between server pings.
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,

    /// Silence after which a client is considered gone.
    #[serde(default = "default_heartbeat_timeout_secs")]
    pub heartbeat_timeout_secs: u64,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            heartbeat_timeout_secs: default_heartbeat_timeout_secs(),
        }
    }
}

fn default_queue_capacity() -> usize {
    1000
}

fn default_heartbeat_interval_secs() -> u64 {
    30
}

fn default_heartbeat_timeout_secs() -> u64 {
    90
}

/// Cursor sync configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SyncConfig {
    /// Page size used when a pull does not specify one.
    #[serde(default = "default_sync_limit")]
    pub default_limit: u32,

    /// Largest page a pull may request.
    #[serde(default = "default_sync_max_limit")]
    pub max_limit: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            default_limit: default_sync_limit(),
            max_limit: default_sync_max_limit(),
        }
    }
}

fn default_sync_limit() -> u32 {
    100
}

fn default_sync_max_limit() -> u32 {
    1000
}

/// Gateway authentication configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    /// Static bearer token to account id map.
    #[serde(default)]
    pub tokens: BTreeMap<String, String>,
}

/// External platform bridge configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct BridgeConfig {
    /// WebSocket URL of the bridge sidecar.
    #[serde(default = "default_bridge_url")]
    pub url: String,

    /// Timeout for opening a bridge connection.
    #[serde(default = "default_bridge_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            url: default_bridge_url(),
            connect_timeout_secs: default_bridge_connect_timeout_secs(),
        }
    }
}

fn default_bridge_url() -> String {
    "ws://127.0.0.1:8641".to_string()
}

fn default_bridge_connect_timeout_secs() -> u64 {
    10
}
