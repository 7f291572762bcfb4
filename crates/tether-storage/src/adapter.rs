// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite storage adapter with lazy initialization and health reporting.

use async_trait::async_trait;
use tokio::sync::OnceCell;
use tracing::debug;

use tether_config::model::StorageConfig;
use tether_core::{AdapterType, HealthStatus, PluginAdapter, TetherError};

use crate::database::Database;

/// SQLite-backed storage adapter.
///
/// Wraps a [`Database`] handle. The database is lazily initialized on the
/// first call to [`SqliteStorage::initialize`]; components receive a clone
/// of the handle via [`SqliteStorage::database`].
pub struct SqliteStorage {
    config: StorageConfig,
    db: OnceCell<Database>,
}

impl SqliteStorage {
    /// Create a new SqliteStorage with the given configuration.
    ///
    /// The database connection is not opened until [`initialize`](Self::initialize) is called.
    pub fn new(config: StorageConfig) -> Self {
        Self {
            config,
            db: OnceCell::new(),
        }
    }

    /// Open the database and run migrations.
    pub async fn initialize(&self) -> Result<(), TetherError> {
        let db = Database::open_with(&self.config.database_path, self.config.wal_mode).await?;
        self.db.set(db).map_err(|_| TetherError::Storage {
            source: "storage already initialized".into(),
        })?;
        debug!(path = %self.config.database_path, "SQLite storage initialized");
        Ok(())
    }

    /// Shared handle to the initialized database.
    pub fn database(&self) -> Result<Database, TetherError> {
        self.db
            .get()
            .cloned()
            .ok_or_else(|| TetherError::Storage {
                source: "storage not initialized -- call initialize() first".into(),
            })
    }
}

#[async_trait]
impl PluginAdapter for SqliteStorage {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Storage
    }

    async fn health_check(&self) -> Result<HealthStatus, TetherError> {
        let Some(db) = self.db.get() else {
            return Ok(HealthStatus::Unhealthy("storage not initialized".into()));
        };
        db.connection()
            .call(|conn| -> Result<(), rusqlite::Error> {
                conn.execute_batch("SELECT 1;")?;
                Ok(())
            })
            .await
            .map_err(crate::database::map_tr_err)?;
        Ok(HealthStatus::Healthy)
    }

    async fn shutdown(&self) -> Result<(), TetherError> {
        if let Some(db) = self.db.get() {
            db.connection()
                .call(|conn| -> Result<(), rusqlite::Error> {
                    conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
                    Ok(())
                })
                .await
                .map_err(crate::database::map_tr_err)?;
            debug!("shutdown: WAL checkpoint complete");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn storage_in(dir: &tempfile::TempDir) -> SqliteStorage {
        SqliteStorage::new(StorageConfig {
            database_path: dir.path().join("tether.db").to_string_lossy().into_owned(),
            wal_mode: true,
        })
    }

    #[tokio::test]
    async fn uninitialized_storage_reports_unhealthy() {
        let dir = tempdir().unwrap();
        let storage = storage_in(&dir);
        assert!(storage.database().is_err());
        assert!(matches!(
            storage.health_check().await.unwrap(),
            HealthStatus::Unhealthy(_)
        ));
        storage.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn initialize_then_health_check() {
        let dir = tempdir().unwrap();
        let storage = storage_in(&dir);
        storage.initialize().await.unwrap();

        assert_eq!(storage.health_check().await.unwrap(), HealthStatus::Healthy);
        assert_eq!(storage.name(), "sqlite");
        assert_eq!(storage.adapter_type(), AdapterType::Storage);
        assert!(storage.database().is_ok());
        storage.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn double_initialize_fails() {
        let dir = tempdir().unwrap();
        let storage = storage_in(&dir);
        storage.initialize().await.unwrap();
        assert!(storage.initialize().await.is_err());
    }
}
