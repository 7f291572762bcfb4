// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test harness for end-to-end integration testing.
//!
//! `TestHarness` assembles a session manager over a mock connector, a temp
//! SQLite database, and a notification hub. Timings default to values short
//! enough for tests to exercise expiry without sleeping long.

use std::sync::Arc;
use std::time::Duration;

use tether_bus::NotificationHub;
use tether_config::model::{SessionConfig, StorageConfig, TetherConfig};
use tether_core::{ProtocolEvent, TetherError};
use tether_session::{SessionManager, SessionSettings};
use tether_storage::{Database, SqliteStorage};

use crate::mock_connector::MockConnector;

/// Builder for creating test environments with configurable options.
pub struct TestHarnessBuilder {
    script: Vec<ProtocolEvent>,
    pairing_wait: Duration,
    pairing_code_ttl: Duration,
    disconnected_ttl: Duration,
    queue_capacity: usize,
}

impl TestHarnessBuilder {
    fn new() -> Self {
        Self {
            script: Vec::new(),
            pairing_wait: Duration::from_secs(2),
            pairing_code_ttl: Duration::from_secs(60),
            disconnected_ttl: Duration::from_secs(60),
            queue_capacity: 16,
        }
    }

    /// Events the mock platform emits as soon as a client opens.
    pub fn with_script(mut self, events: Vec<ProtocolEvent>) -> Self {
        self.script = events;
        self
    }

    /// How long `connect` waits for the first pairing code.
    pub fn with_pairing_wait(mut self, wait: Duration) -> Self {
        self.pairing_wait = wait;
        self
    }

    pub fn with_pairing_code_ttl(mut self, ttl: Duration) -> Self {
        self.pairing_code_ttl = ttl;
        self
    }

    pub fn with_disconnected_ttl(mut self, ttl: Duration) -> Self {
        self.disconnected_ttl = ttl;
        self
    }

    /// Per-subscriber notification queue size.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Build the test harness, creating all required subsystems.
    pub async fn build(self) -> Result<TestHarness, TetherError> {
        let temp_dir =
            tempfile::TempDir::new().map_err(|e| TetherError::Storage { source: e.into() })?;
        let db_path = temp_dir.path().join("test.db").to_string_lossy().into_owned();

        let storage_config = StorageConfig {
            database_path: db_path,
            wal_mode: true,
        };
        let storage = SqliteStorage::new(storage_config.clone());
        storage.initialize().await?;
        let db = storage.database()?;

        let mut config = TetherConfig {
            storage: storage_config,
            session: SessionConfig {
                integration: "mock".into(),
                ..SessionConfig::default()
            },
            ..TetherConfig::default()
        };
        config.notify.queue_capacity = self.queue_capacity;

        let settings = SessionSettings {
            pairing_wait: self.pairing_wait,
            pairing_code_ttl: self.pairing_code_ttl,
            disconnected_ttl: self.disconnected_ttl,
            ..SessionSettings::from(&config.session)
        };

        let connector = Arc::new(MockConnector::new().with_script(self.script));
        let hub = NotificationHub::new(self.queue_capacity);
        let manager = SessionManager::new(
            db.clone(),
            connector.clone(),
            Arc::new(hub.clone()),
            settings,
        );

        Ok(TestHarness {
            db,
            hub,
            connector,
            manager,
            config,
            _temp_dir: temp_dir,
        })
    }
}

/// A complete test environment with a mock platform and temp storage.
pub struct TestHarness {
    /// Database in the temp directory.
    pub db: Database,
    /// Notification hub the manager publishes to.
    pub hub: NotificationHub,
    /// The mock external platform.
    pub connector: Arc<MockConnector>,
    pub manager: SessionManager,
    pub config: TetherConfig,
    /// Temp directory kept alive for cleanup on drop.
    _temp_dir: tempfile::TempDir,
}

impl TestHarness {
    /// Create a new builder for configuring the test harness.
    pub fn builder() -> TestHarnessBuilder {
        TestHarnessBuilder::new()
    }

    /// Harness with default timings and no scripted events.
    pub async fn new() -> Result<Self, TetherError> {
        Self::builder().build().await
    }

    /// A harness whose platform issues `code` immediately on open.
    pub async fn with_pairing_code(code: &str) -> Result<Self, TetherError> {
        Self::builder()
            .with_script(vec![pairing_code(code)])
            .build()
            .await
    }
}

/// A pairing-code event expiring one minute from now.
pub fn pairing_code(code: &str) -> ProtocolEvent {
    ProtocolEvent::PairingCode {
        code: code.to_string(),
        expires_at: chrono::Utc::now() + chrono::Duration::seconds(60),
    }
}

/// Poll `check` until it returns true or `timeout` elapses.
pub async fn eventually<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
