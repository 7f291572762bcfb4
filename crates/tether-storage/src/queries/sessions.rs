// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! External session rows.

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, TransactionBehavior, params};
use tether_core::{ExternalSession, SessionStatus, TetherError};

use crate::database::Database;
use crate::models::{decode_enum, decode_opt_ts, decode_ts, encode_ts};

const SESSION_COLUMNS: &str = "id, account_id, integration, status, external_identity, reason, \
     pairing_expires_at, created_at, connected_at, disconnected_at, last_activity_at";

/// Result of [`insert_session`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// A non-terminal session already holds the (account, integration) slot.
    Conflict(ExternalSession),
}

/// Insert a new session unless a live one exists for the same account and
/// integration. Check and insert share one immediate transaction.
pub async fn insert_session(
    db: &Database,
    session: &ExternalSession,
) -> Result<InsertOutcome, TetherError> {
    let session = session.clone();
    db.connection()
        .call(move |conn| -> Result<InsertOutcome, rusqlite::Error> {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            if let Some(existing) =
                live_session_in(&tx, &session.account_id, &session.integration)?
            {
                return Ok(InsertOutcome::Conflict(existing));
            }
            tx.execute(
                &format!(
                    "INSERT INTO external_sessions ({SESSION_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
                ),
                params![
                    session.id,
                    session.account_id,
                    session.integration,
                    session.status.to_string(),
                    session.external_identity,
                    session.reason,
                    session.pairing_expires_at.as_ref().map(encode_ts),
                    encode_ts(&session.created_at),
                    session.connected_at.as_ref().map(encode_ts),
                    session.disconnected_at.as_ref().map(encode_ts),
                    encode_ts(&session.last_activity_at),
                ],
            )?;
            tx.commit()?;
            Ok(InsertOutcome::Inserted)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Get a session by ID.
pub async fn get_session(db: &Database, id: &str) -> Result<Option<ExternalSession>, TetherError> {
    let id = id.to_string();
    db.connection()
        .call(move |conn| -> Result<Option<ExternalSession>, rusqlite::Error> {
            conn.query_row(
                &format!("SELECT {SESSION_COLUMNS} FROM external_sessions WHERE id = ?1"),
                params![id],
                session_from_row,
            )
            .optional()
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// The non-terminal session for an account and integration, if any.
pub async fn find_live_session(
    db: &Database,
    account_id: &str,
    integration: &str,
) -> Result<Option<ExternalSession>, TetherError> {
    let account_id = account_id.to_string();
    let integration = integration.to_string();
    db.connection()
        .call(move |conn| -> Result<Option<ExternalSession>, rusqlite::Error> {
            let tx = conn.transaction()?;
            let found = live_session_in(&tx, &account_id, &integration)?;
            tx.commit()?;
            Ok(found)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Most recently created session for an account, in any state.
pub async fn latest_session_for_account(
    db: &Database,
    account_id: &str,
) -> Result<Option<ExternalSession>, TetherError> {
    let account_id = account_id.to_string();
    db.connection()
        .call(move |conn| -> Result<Option<ExternalSession>, rusqlite::Error> {
            conn.query_row(
                &format!(
                    "SELECT {SESSION_COLUMNS} FROM external_sessions
                     WHERE account_id = ?1
                     ORDER BY created_at DESC, rowid DESC LIMIT 1"
                ),
                params![account_id],
                session_from_row,
            )
            .optional()
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// List sessions, optionally filtered by status, newest first.
pub async fn list_sessions(
    db: &Database,
    status: Option<SessionStatus>,
) -> Result<Vec<ExternalSession>, TetherError> {
    let status = status.map(|s| s.to_string());
    db.connection()
        .call(move |conn| -> Result<Vec<ExternalSession>, rusqlite::Error> {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SESSION_COLUMNS} FROM external_sessions
                 WHERE ?1 IS NULL OR status = ?1
                 ORDER BY created_at DESC, rowid DESC"
            ))?;
            let rows = stmt.query_map(params![status], session_from_row)?;
            rows.collect()
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Persist every mutable column of `session`.
pub async fn save_session(db: &Database, session: &ExternalSession) -> Result<(), TetherError> {
    let id = session.id.clone();
    let session = session.clone();
    let updated = db
        .connection()
        .call(move |conn| -> Result<usize, rusqlite::Error> {
            conn.execute(
                "UPDATE external_sessions SET
                     status = ?2,
                     external_identity = ?3,
                     reason = ?4,
                     pairing_expires_at = ?5,
                     connected_at = ?6,
                     disconnected_at = ?7,
                     last_activity_at = ?8
                 WHERE id = ?1",
                params![
                    session.id,
                    session.status.to_string(),
                    session.external_identity,
                    session.reason,
                    session.pairing_expires_at.as_ref().map(encode_ts),
                    session.connected_at.as_ref().map(encode_ts),
                    session.disconnected_at.as_ref().map(encode_ts),
                    encode_ts(&session.last_activity_at),
                ],
            )
        })
        .await
        .map_err(crate::database::map_tr_err)?;
    if updated == 0 {
        return Err(TetherError::NotFound {
            kind: "session".into(),
            id,
        });
    }
    Ok(())
}

/// Record activity without rewriting the rest of the row.
pub async fn touch_activity(
    db: &Database,
    id: &str,
    at: DateTime<Utc>,
) -> Result<(), TetherError> {
    let id = id.to_string();
    let at = encode_ts(&at);
    db.connection()
        .call(move |conn| -> Result<(), rusqlite::Error> {
            conn.execute(
                "UPDATE external_sessions SET last_activity_at = ?2
                 WHERE id = ?1 AND last_activity_at < ?2",
                params![id, at],
            )?;
            Ok(())
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Expire every non-terminal row. Run at startup, when no protocol client
/// from a previous process can still be attached to them.
pub async fn expire_orphaned(
    db: &Database,
    reason: &str,
    now: DateTime<Utc>,
) -> Result<usize, TetherError> {
    let reason = reason.to_string();
    let now = encode_ts(&now);
    db.connection()
        .call(move |conn| -> Result<usize, rusqlite::Error> {
            conn.execute(
                &format!(
                    "UPDATE external_sessions
                     SET status = 'expired', reason = ?1, disconnected_at = COALESCE(disconnected_at, ?2)
                     WHERE status IN {}",
                    SessionStatus::NON_TERMINAL_SQL
                ),
                params![reason, now],
            )
        })
        .await
        .map_err(crate::database::map_tr_err)
}

fn live_session_in(
    tx: &rusqlite::Transaction<'_>,
    account_id: &str,
    integration: &str,
) -> Result<Option<ExternalSession>, rusqlite::Error> {
    tx.query_row(
        &format!(
            "SELECT {SESSION_COLUMNS} FROM external_sessions
             WHERE account_id = ?1 AND integration = ?2 AND status IN {}",
            SessionStatus::NON_TERMINAL_SQL
        ),
        params![account_id, integration],
        session_from_row,
    )
    .optional()
}

fn session_from_row(row: &rusqlite::Row<'_>) -> Result<ExternalSession, rusqlite::Error> {
    let status: String = row.get(3)?;
    let created_at: String = row.get(7)?;
    let last_activity_at: String = row.get(10)?;
    Ok(ExternalSession {
        id: row.get(0)?,
        account_id: row.get(1)?,
        integration: row.get(2)?,
        status: decode_enum(3, &status)?,
        external_identity: row.get(4)?,
        reason: row.get(5)?,
        pairing_expires_at: decode_opt_ts(6, row.get(6)?)?,
        created_at: decode_ts(7, &created_at)?,
        connected_at: decode_opt_ts(8, row.get(8)?)?,
        disconnected_at: decode_opt_ts(9, row.get(9)?)?,
        last_activity_at: decode_ts(10, &last_activity_at)?,
    })
}
