// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Local-first replica: a client-side copy of one account's syncable state.
//!
//! The replica stores rows keyed by stable identity and a cursor per entity
//! type. Applying a page upserts its rows and advances the cursor in one
//! transaction, so a crash mid-apply replays the whole page next time.
//! Replays are harmless: a row is only overwritten by a newer seq.

use std::path::Path;
use std::sync::Arc;

use rusqlite::{OptionalExtension, TransactionBehavior, params};
use tracing::{debug, info};

use tether_core::types::Notification;
use tether_core::{EntityType, SyncPage, SyncRow, TetherError};
use tether_storage::database::map_tr_err;

use crate::service::PullSource;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS replica_cursors (
    entity_type TEXT PRIMARY KEY,
    seq INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS replica_rows (
    entity_type TEXT NOT NULL,
    id TEXT NOT NULL,
    seq INTEGER NOT NULL,
    data TEXT NOT NULL,
    PRIMARY KEY (entity_type, id)
);
";

/// A replica of one account.
pub struct Replica {
    conn: tokio_rusqlite::Connection,
    account_id: String,
    source: Arc<dyn PullSource>,
    page_limit: Option<u32>,
}

impl std::fmt::Debug for Replica {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Replica")
            .field("account_id", &self.account_id)
            .field("page_limit", &self.page_limit)
            .finish_non_exhaustive()
    }
}

impl Replica {
    /// Open (or create) a replica file for `account_id`.
    pub async fn open(
        path: impl AsRef<Path>,
        account_id: &str,
        source: Arc<dyn PullSource>,
    ) -> Result<Self, TetherError> {
        let conn = tokio_rusqlite::Connection::open(path.as_ref())
            .await
            .map_err(|e| TetherError::Storage {
                source: Box::new(e),
            })?;
        Self::init(conn, account_id, source).await
    }

    /// Volatile replica, for tests and short-lived tools.
    pub async fn open_in_memory(
        account_id: &str,
        source: Arc<dyn PullSource>,
    ) -> Result<Self, TetherError> {
        let conn = tokio_rusqlite::Connection::open_in_memory()
            .await
            .map_err(|e| TetherError::Storage {
                source: Box::new(e),
            })?;
        Self::init(conn, account_id, source).await
    }

    async fn init(
        conn: tokio_rusqlite::Connection,
        account_id: &str,
        source: Arc<dyn PullSource>,
    ) -> Result<Self, TetherError> {
        conn.call(|conn| -> Result<(), rusqlite::Error> { conn.execute_batch(SCHEMA) })
            .await
            .map_err(map_tr_err)?;
        Ok(Self {
            conn,
            account_id: account_id.to_string(),
            source,
            page_limit: None,
        })
    }

    /// Page size requested from the source; `None` uses the server default.
    pub fn with_page_limit(mut self, limit: u32) -> Self {
        self.page_limit = Some(limit);
        self
    }

    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    /// Highest seq applied for `entity`, or 0.
    pub async fn cursor(&self, entity: EntityType) -> Result<i64, TetherError> {
        let tag = entity.to_string();
        self.conn
            .call(move |conn| -> Result<i64, rusqlite::Error> {
                let seq = conn
                    .query_row(
                        "SELECT seq FROM replica_cursors WHERE entity_type = ?1",
                        params![tag],
                        |row| row.get(0),
                    )
                    .optional()?;
                Ok(seq.unwrap_or(0))
            })
            .await
            .map_err(map_tr_err)
    }

    /// Local copy of one row.
    pub async fn row(&self, entity: EntityType, id: &str) -> Result<Option<SyncRow>, TetherError> {
        let tag = entity.to_string();
        let id = id.to_string();
        let found = self
            .conn
            .call(move |conn| -> Result<Option<(i64, String, String)>, rusqlite::Error> {
                conn.query_row(
                    "SELECT seq, id, data FROM replica_rows WHERE entity_type = ?1 AND id = ?2",
                    params![tag, id],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )
                .optional()
            })
            .await
            .map_err(map_tr_err)?;
        found
            .map(|(seq, id, data)| {
                let data = serde_json::from_str(&data)
                    .map_err(|e| TetherError::Internal(format!("corrupt replica row {id}: {e}")))?;
                Ok(SyncRow { seq, id, data })
            })
            .transpose()
    }

    /// Number of rows held for `entity`.
    pub async fn row_count(&self, entity: EntityType) -> Result<usize, TetherError> {
        let tag = entity.to_string();
        let count = self
            .conn
            .call(move |conn| -> Result<i64, rusqlite::Error> {
                conn.query_row(
                    "SELECT COUNT(*) FROM replica_rows WHERE entity_type = ?1",
                    params![tag],
                    |row| row.get(0),
                )
            })
            .await
            .map_err(map_tr_err)?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    /// Apply a page in order and advance the cursor. Returns the new cursor.
    ///
    /// The cursor never moves backwards, so re-applying an old page is a no-op.
    pub async fn apply_page(&self, page: &SyncPage) -> Result<i64, TetherError> {
        let tag = page.entity_type.to_string();
        let cursor = page.cursor;
        let rows = page
            .rows
            .iter()
            .map(|row| {
                serde_json::to_string(&row.data)
                    .map(|data| (row.seq, row.id.clone(), data))
                    .map_err(|e| TetherError::Internal(e.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        self.conn
            .call(move |conn| -> Result<i64, rusqlite::Error> {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                {
                    let mut upsert = tx.prepare(
                        "INSERT INTO replica_rows (entity_type, id, seq, data)
                         VALUES (?1, ?2, ?3, ?4)
                         ON CONFLICT (entity_type, id) DO UPDATE
                         SET seq = excluded.seq, data = excluded.data
                         WHERE excluded.seq > replica_rows.seq",
                    )?;
                    for (seq, id, data) in &rows {
                        upsert.execute(params![tag, id, seq, data])?;
                    }
                }
                tx.execute(
                    "INSERT INTO replica_cursors (entity_type, seq) VALUES (?1, ?2)
                     ON CONFLICT (entity_type) DO UPDATE SET seq = MAX(seq, excluded.seq)",
                    params![tag, cursor],
                )?;
                let current: i64 = tx.query_row(
                    "SELECT seq FROM replica_cursors WHERE entity_type = ?1",
                    params![tag],
                    |row| row.get(0),
                )?;
                tx.commit()?;
                Ok(current)
            })
            .await
            .map_err(map_tr_err)
    }

    /// Pull and apply `entity` until caught up. Returns rows applied.
    pub async fn sync_entity(&self, entity: EntityType) -> Result<usize, TetherError> {
        let mut applied = 0;
        loop {
            let since = self.cursor(entity).await?;
            let page = self
                .source
                .pull(&self.account_id, entity, since, self.page_limit)
                .await?;
            if page.rows.is_empty() {
                break;
            }
            applied += page.rows.len();
            let cursor = self.apply_page(&page).await?;
            debug!(account_id = %self.account_id, %entity, cursor, rows = page.rows.len(), "applied page");
            if !page.has_more {
                break;
            }
        }
        Ok(applied)
    }

    /// Catch up every entity type. Returns rows applied.
    pub async fn sync_all(&self) -> Result<usize, TetherError> {
        let mut applied = 0;
        for entity in EntityType::ALL {
            applied += self.sync_entity(entity).await?;
        }
        if applied > 0 {
            info!(account_id = %self.account_id, applied, "replica caught up");
        }
        Ok(applied)
    }

    /// React to a realtime hint. Hints for other accounts, or for an event
    /// seq already applied, are ignored. Returns whether a sync ran.
    pub async fn on_notification(&self, notification: &Notification) -> Result<bool, TetherError> {
        if notification.account_id != self.account_id {
            return Ok(false);
        }
        if self.cursor(EntityType::Events).await? >= notification.seq {
            debug!(account_id = %self.account_id, seq = notification.seq, "stale hint ignored");
            return Ok(false);
        }
        self.sync_all().await?;
        Ok(true)
    }
}
