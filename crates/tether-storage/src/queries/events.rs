// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Append-only event log.
//!
//! Every append runs in one immediate transaction: duplicate check, seq
//! allocation, insert, and any entity projections. A failure anywhere rolls
//! the whole thing back, so the counter never skips a value.

use rusqlite::{OptionalExtension, TransactionBehavior, params};
use tether_core::{AppendOutcome, EntityType, Event, NewEvent, TetherError};
use tracing::debug;

use crate::database::Database;
use crate::models::{EntityWrite, decode_enum, decode_json, decode_ts, encode_ts};
use crate::queries::entities;

const EVENT_COLUMNS: &str = "seq, id, event_type, account_id, conversation_id, \
     external_message_id, payload, attachment_ref, timestamp";

/// Append a single event. A repeated `id` returns the original seq untouched.
pub async fn append_event(db: &Database, event: NewEvent) -> Result<AppendOutcome, TetherError> {
    append_with_projection(db, event, Vec::new()).await
}

/// Append an event and apply its entity projections in the same transaction.
///
/// Projections are skipped for duplicates: whatever the first append
/// projected is already in place.
pub async fn append_with_projection(
    db: &Database,
    event: NewEvent,
    writes: Vec<EntityWrite>,
) -> Result<AppendOutcome, TetherError> {
    if event.id.is_empty() {
        return Err(TetherError::InvalidInput("event id must not be empty".into()));
    }
    if writes.iter().any(|w| w.entity_type == EntityType::Events) {
        return Err(TetherError::InvalidInput(
            "the event log cannot be written through a projection".into(),
        ));
    }

    let payload = serde_json::to_string(&event.payload).map_err(|e| TetherError::Storage {
        source: Box::new(e),
    })?;
    let event_type = event.event_type.to_string();
    let timestamp = encode_ts(&event.timestamp);
    let now = encode_ts(&chrono::Utc::now());
    let event_id = event.id.clone();

    let outcome = db
        .connection()
        .call(move |conn| -> Result<AppendOutcome, rusqlite::Error> {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let existing: Option<i64> = tx
                .query_row(
                    "SELECT seq FROM events WHERE id = ?1",
                    params![event.id],
                    |row| row.get(0),
                )
                .optional()?;
            if let Some(seq) = existing {
                return Ok(AppendOutcome::Duplicate(seq));
            }

            let seq = entities::next_seq(&tx, EntityType::Events)?;
            tx.execute(
                "INSERT INTO events (seq, id, event_type, account_id, conversation_id,
                                     external_message_id, payload, attachment_ref, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    seq,
                    event.id,
                    event_type,
                    event.account_id,
                    event.conversation_id,
                    event.external_message_id,
                    payload,
                    event.attachment_ref,
                    timestamp,
                ],
            )?;

            for write in &writes {
                entities::upsert_in_tx(&tx, &event.account_id, write, &now)?;
            }

            tx.commit()?;
            Ok(AppendOutcome::Appended(seq))
        })
        .await
        .map_err(crate::database::map_tr_err)?;

    match outcome {
        AppendOutcome::Appended(seq) => {
            metrics::counter!("tether_events_appended_total").increment(1);
            debug!(event_id = %event_id, seq, "event appended");
        }
        AppendOutcome::Duplicate(seq) => {
            metrics::counter!("tether_events_duplicate_total").increment(1);
            debug!(event_id = %event_id, seq, "duplicate event ignored");
        }
    }
    Ok(outcome)
}

/// Look up a single event by its producer id.
pub async fn get_event(db: &Database, id: &str) -> Result<Option<Event>, TetherError> {
    let id = id.to_string();
    db.connection()
        .call(move |conn| -> Result<Option<Event>, rusqlite::Error> {
            conn.query_row(
                &format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = ?1"),
                params![id],
                event_from_row,
            )
            .optional()
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Events for an account with `seq > since`, ascending, at most `limit`.
/// `conversation_id` narrows the scan to one conversation.
pub async fn events_after(
    db: &Database,
    account_id: &str,
    conversation_id: Option<&str>,
    since: i64,
    limit: u32,
) -> Result<Vec<Event>, TetherError> {
    let account_id = account_id.to_string();
    let conversation_id = conversation_id.map(str::to_string);
    db.connection()
        .call(move |conn| -> Result<Vec<Event>, rusqlite::Error> {
            match &conversation_id {
                Some(conversation_id) => {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {EVENT_COLUMNS} FROM events
                         WHERE account_id = ?1 AND conversation_id = ?2 AND seq > ?3
                         ORDER BY seq ASC LIMIT ?4"
                    ))?;
                    let rows = stmt.query_map(
                        params![account_id, conversation_id, since, limit],
                        event_from_row,
                    )?;
                    rows.collect()
                }
                None => {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {EVENT_COLUMNS} FROM events
                         WHERE account_id = ?1 AND seq > ?2
                         ORDER BY seq ASC LIMIT ?3"
                    ))?;
                    let rows = stmt.query_map(params![account_id, since, limit], event_from_row)?;
                    rows.collect()
                }
            }
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Highest seq ever assigned to the event log (0 when empty).
pub async fn head_seq(db: &Database) -> Result<i64, TetherError> {
    db.connection()
        .call(|conn| -> Result<i64, rusqlite::Error> {
            conn.query_row(
                "SELECT value FROM seq_counters WHERE name = 'events'",
                [],
                |row| row.get(0),
            )
        })
        .await
        .map_err(crate::database::map_tr_err)
}

fn event_from_row(row: &rusqlite::Row<'_>) -> Result<Event, rusqlite::Error> {
    let event_type: String = row.get(2)?;
    let payload: String = row.get(6)?;
    let timestamp: String = row.get(8)?;
    Ok(Event {
        seq: row.get(0)?,
        id: row.get(1)?,
        event_type: decode_enum(2, &event_type)?,
        account_id: row.get(3)?,
        conversation_id: row.get(4)?,
        external_message_id: row.get(5)?,
        payload: decode_json(6, &payload)?,
        attachment_ref: row.get(7)?,
        timestamp: decode_ts(8, &timestamp)?,
    })
}
