// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Server side of the cursor protocol.
//!
//! Pull is stateless: everything a replica needs to resume lives in its own
//! cursor, so concurrent replicas of one account never coordinate.

use async_trait::async_trait;
use tracing::debug;

use tether_config::model::SyncConfig;
use tether_core::{EntityType, SyncPage, TetherError};
use tether_storage::Database;
use tether_storage::queries::entities;

/// Where a replica fetches pages from.
#[async_trait]
pub trait PullSource: Send + Sync {
    async fn pull(
        &self,
        account_id: &str,
        entity: EntityType,
        since: i64,
        limit: Option<u32>,
    ) -> Result<SyncPage, TetherError>;
}

/// Answers Pull requests from the server database.
#[derive(Debug, Clone)]
pub struct SyncService {
    db: Database,
    default_limit: u32,
    max_limit: u32,
}

impl SyncService {
    pub fn new(db: Database, config: &SyncConfig) -> Self {
        Self {
            db,
            default_limit: config.default_limit,
            max_limit: config.max_limit,
        }
    }

    /// Rows of `entity` for `account_id` with `seq > since`, ascending.
    ///
    /// `limit` defaults to the configured page size and is capped at the
    /// configured maximum. The returned cursor is the last row's seq, or
    /// `since` when the page is empty.
    pub async fn pull(
        &self,
        account_id: &str,
        entity: EntityType,
        since: i64,
        limit: Option<u32>,
    ) -> Result<SyncPage, TetherError> {
        if since < 0 {
            return Err(TetherError::InvalidInput(format!(
                "since must be >= 0, got {since}"
            )));
        }
        let limit = match limit {
            Some(0) => {
                return Err(TetherError::InvalidInput("limit must be positive".into()));
            }
            Some(n) => n.min(self.max_limit),
            None => self.default_limit,
        };

        let rows = entities::pull(&self.db, account_id, entity, since, limit).await?;
        let cursor = rows.last().map_or(since, |row| row.seq);
        let has_more = rows.len() == limit as usize;
        debug!(account_id, %entity, since, rows = rows.len(), cursor, "pull");
        Ok(SyncPage {
            entity_type: entity,
            rows,
            cursor,
            has_more,
        })
    }
}

#[async_trait]
impl PullSource for SyncService {
    async fn pull(
        &self,
        account_id: &str,
        entity: EntityType,
        since: i64,
        limit: Option<u32>,
    ) -> Result<SyncPage, TetherError> {
        SyncService::pull(self, account_id, entity, since, limit).await
    }
}
