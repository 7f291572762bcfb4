// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Outbox operations for crash-safe outbound delivery.
//!
//! Entries move `queued -> sending -> sent`, with `retry` between attempts
//! and `failed` once retries run out or the failure is permanent. A row
//! found in `sending` after a restart is put back to `retry`; the send may
//! or may not have reached the platform, and the idempotency key lets the
//! platform side dedupe.

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, TransactionBehavior, params};
use tether_core::{EnqueueOutcome, OutboxEntry, OutboxStatus, TetherError};

use crate::database::Database;
use crate::models::{RetryPolicy, decode_enum, decode_json, decode_ts, encode_ts};

const OUTBOX_COLUMNS: &str = "idempotency_key, account_id, conversation_id, payload, status, \
     event_seq, last_error, retry_count, next_attempt_at, created_at, updated_at";

/// Record an outbound action. Re-using a key returns the original entry
/// with `created == false` and changes nothing.
pub async fn enqueue(
    db: &Database,
    idempotency_key: &str,
    account_id: &str,
    conversation_id: &str,
    payload: &serde_json::Value,
    now: DateTime<Utc>,
) -> Result<EnqueueOutcome, TetherError> {
    if idempotency_key.trim().is_empty() {
        return Err(TetherError::InvalidInput(
            "idempotency key must not be empty".into(),
        ));
    }
    let entry = OutboxEntry {
        idempotency_key: idempotency_key.to_string(),
        account_id: account_id.to_string(),
        conversation_id: conversation_id.to_string(),
        payload: payload.clone(),
        status: OutboxStatus::Queued,
        event_seq: None,
        last_error: None,
        retry_count: 0,
        next_attempt_at: now,
        created_at: now,
        updated_at: now,
    };
    let payload = serde_json::to_string(payload).map_err(|e| TetherError::Storage {
        source: Box::new(e),
    })?;

    let outcome = db
        .connection()
        .call(move |conn| -> Result<EnqueueOutcome, rusqlite::Error> {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let existing = tx
                .query_row(
                    &format!("SELECT {OUTBOX_COLUMNS} FROM outbox WHERE idempotency_key = ?1"),
                    params![entry.idempotency_key],
                    entry_from_row,
                )
                .optional()?;
            if let Some(existing) = existing {
                return Ok(EnqueueOutcome {
                    entry: existing,
                    created: false,
                });
            }

            let ts = encode_ts(&now);
            tx.execute(
                &format!(
                    "INSERT INTO outbox ({OUTBOX_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, 'queued', NULL, NULL, 0, ?5, ?5, ?5)"
                ),
                params![
                    entry.idempotency_key,
                    entry.account_id,
                    entry.conversation_id,
                    payload,
                    ts,
                ],
            )?;
            tx.commit()?;
            Ok(EnqueueOutcome {
                entry,
                created: true,
            })
        })
        .await
        .map_err(crate::database::map_tr_err)?;

    if !outcome.created && outcome.entry.account_id != account_id {
        return Err(TetherError::InvalidInput(
            "idempotency key is already in use".into(),
        ));
    }
    Ok(outcome)
}

/// Look up an entry by its idempotency key.
pub async fn get(db: &Database, idempotency_key: &str) -> Result<Option<OutboxEntry>, TetherError> {
    let key = idempotency_key.to_string();
    db.connection()
        .call(move |conn| -> Result<Option<OutboxEntry>, rusqlite::Error> {
            conn.query_row(
                &format!("SELECT {OUTBOX_COLUMNS} FROM outbox WHERE idempotency_key = ?1"),
                params![key],
                entry_from_row,
            )
            .optional()
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Claim up to `limit` due entries, oldest first, and mark them `sending`.
pub async fn claim_due(
    db: &Database,
    now: DateTime<Utc>,
    limit: u32,
) -> Result<Vec<OutboxEntry>, TetherError> {
    let now = encode_ts(&now);
    db.connection()
        .call(move |conn| -> Result<Vec<OutboxEntry>, rusqlite::Error> {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let due: Vec<OutboxEntry> = {
                let mut stmt = tx.prepare(&format!(
                    "SELECT {OUTBOX_COLUMNS} FROM outbox
                     WHERE status IN ('queued', 'retry') AND next_attempt_at <= ?1
                     ORDER BY created_at ASC, rowid ASC
                     LIMIT ?2"
                ))?;
                let rows = stmt.query_map(params![now, limit], entry_from_row)?;
                rows.collect::<Result<_, _>>()?
            };

            for entry in &due {
                tx.execute(
                    "UPDATE outbox SET status = 'sending', updated_at = ?2
                     WHERE idempotency_key = ?1",
                    params![entry.idempotency_key, now],
                )?;
            }
            tx.commit()?;

            Ok(due
                .into_iter()
                .map(|entry| OutboxEntry {
                    status: OutboxStatus::Sending,
                    ..entry
                })
                .collect())
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Mark an entry delivered and link the event that records the send.
pub async fn mark_sent(
    db: &Database,
    idempotency_key: &str,
    event_seq: i64,
    now: DateTime<Utc>,
) -> Result<(), TetherError> {
    let key = idempotency_key.to_string();
    let now = encode_ts(&now);
    db.connection()
        .call(move |conn| -> Result<(), rusqlite::Error> {
            conn.execute(
                "UPDATE outbox SET status = 'sent', event_seq = ?2, last_error = NULL,
                 updated_at = ?3
                 WHERE idempotency_key = ?1",
                params![key, event_seq, now],
            )?;
            Ok(())
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Record a failed attempt and return the resulting status.
///
/// Permanent failures go straight to `failed`. Transient ones go to `retry`
/// with an exponential backoff until `policy.max_retries` is reached.
pub async fn record_failure(
    db: &Database,
    idempotency_key: &str,
    error: &str,
    permanent: bool,
    policy: RetryPolicy,
    now: DateTime<Utc>,
) -> Result<OutboxStatus, TetherError> {
    let key = idempotency_key.to_string();
    let error = error.to_string();
    db.connection()
        .call(move |conn| -> Result<OutboxStatus, rusqlite::Error> {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let retry_count: i64 = tx.query_row(
                "SELECT retry_count FROM outbox WHERE idempotency_key = ?1",
                params![key],
                |row| row.get(0),
            )?;

            let attempts = retry_count + 1;
            let exhausted = attempts >= i64::from(policy.max_retries);
            let status = if permanent || exhausted {
                OutboxStatus::Failed
            } else {
                OutboxStatus::Retry
            };
            let delay = policy.backoff(u32::try_from(attempts).unwrap_or(u32::MAX));
            let next_attempt_at = chrono::Duration::from_std(delay)
                .ok()
                .and_then(|d| now.checked_add_signed(d))
                .unwrap_or(now);

            tx.execute(
                "UPDATE outbox SET status = ?2, retry_count = ?3, last_error = ?4,
                 next_attempt_at = ?5, updated_at = ?6
                 WHERE idempotency_key = ?1",
                params![
                    key,
                    status.to_string(),
                    attempts,
                    error,
                    encode_ts(&next_attempt_at),
                    encode_ts(&now),
                ],
            )?;
            tx.commit()?;
            Ok(status)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Move entries stranded in `sending` back to `retry`, due immediately.
pub async fn recover_in_flight(db: &Database, now: DateTime<Utc>) -> Result<usize, TetherError> {
    let now = encode_ts(&now);
    db.connection()
        .call(move |conn| -> Result<usize, rusqlite::Error> {
            conn.execute(
                "UPDATE outbox SET status = 'retry', next_attempt_at = ?1, updated_at = ?1
                 WHERE status = 'sending'",
                params![now],
            )
        })
        .await
        .map_err(crate::database::map_tr_err)
}

fn entry_from_row(row: &rusqlite::Row<'_>) -> Result<OutboxEntry, rusqlite::Error> {
    let payload: String = row.get(3)?;
    let status: String = row.get(4)?;
    let next_attempt_at: String = row.get(8)?;
    let created_at: String = row.get(9)?;
    let updated_at: String = row.get(10)?;
    Ok(OutboxEntry {
        idempotency_key: row.get(0)?,
        account_id: row.get(1)?,
        conversation_id: row.get(2)?,
        payload: decode_json(3, &payload)?,
        status: decode_enum(4, &status)?,
        event_seq: row.get(5)?,
        last_error: row.get(6)?,
        retry_count: row.get(7)?,
        next_attempt_at: decode_ts(8, &next_attempt_at)?,
        created_at: decode_ts(9, &created_at)?,
        updated_at: decode_ts(10, &updated_at)?,
    })
}
