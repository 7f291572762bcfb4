// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Syncable entity tables and the cursor scan behind Pull.

use rusqlite::{OptionalExtension, Transaction, params};
use tether_core::{EntityType, SyncRow, TetherError};

use crate::database::Database;
use crate::models::{EntityWrite, decode_json, merge_json};
use crate::queries::events;

/// Allocate the next seq for `entity`'s table. Must run inside the
/// transaction that writes the row.
pub(crate) fn next_seq(tx: &Transaction<'_>, entity: EntityType) -> Result<i64, rusqlite::Error> {
    tx.query_row(
        "UPDATE seq_counters SET value = value + 1 WHERE name = ?1 RETURNING value",
        params![entity.table()],
        |row| row.get(0),
    )
}

/// Insert or merge one entity row, assigning it a fresh seq.
pub(crate) fn upsert_in_tx(
    tx: &Transaction<'_>,
    account_id: &str,
    write: &EntityWrite,
    now: &str,
) -> Result<i64, rusqlite::Error> {
    let table = write.entity_type.table();
    let existing: Option<String> = tx
        .query_row(
            &format!("SELECT data FROM {table} WHERE account_id = ?1 AND id = ?2"),
            params![account_id, write.id],
            |row| row.get(0),
        )
        .optional()?;

    let data = match existing {
        Some(raw) => merge_json(decode_json(0, &raw)?, write.data.clone()),
        None => write.data.clone(),
    };
    let data = serde_json::to_string(&data).map_err(|e| {
        rusqlite::Error::ToSqlConversionFailure(Box::new(e))
    })?;

    let seq = next_seq(tx, write.entity_type)?;
    tx.execute(
        &format!(
            "INSERT INTO {table} (account_id, id, seq, data, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (account_id, id) DO UPDATE SET
                 seq = excluded.seq,
                 data = excluded.data,
                 updated_at = excluded.updated_at"
        ),
        params![account_id, write.id, seq, data, now],
    )?;
    Ok(seq)
}

/// Current document for one entity row.
pub async fn get_entity(
    db: &Database,
    account_id: &str,
    entity: EntityType,
    id: &str,
) -> Result<Option<SyncRow>, TetherError> {
    if entity == EntityType::Events {
        return match events::get_event(db, id).await? {
            Some(event) if event.account_id == account_id => Ok(Some(event_row(event)?)),
            _ => Ok(None),
        };
    }
    let account_id = account_id.to_string();
    let id = id.to_string();
    let table = entity.table();
    db.connection()
        .call(move |conn| -> Result<Option<SyncRow>, rusqlite::Error> {
            conn.query_row(
                &format!("SELECT seq, id, data FROM {table} WHERE account_id = ?1 AND id = ?2"),
                params![account_id, id],
                sync_row_from_row,
            )
            .optional()
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Rows of `entity` for an account with `seq > since`, ascending, at most `limit`.
///
/// Seqs are allocated per table across all accounts, so an account sees a
/// strictly increasing but not necessarily contiguous sequence.
pub async fn pull(
    db: &Database,
    account_id: &str,
    entity: EntityType,
    since: i64,
    limit: u32,
) -> Result<Vec<SyncRow>, TetherError> {
    if entity == EntityType::Events {
        return events::events_after(db, account_id, None, since, limit)
            .await?
            .into_iter()
            .map(event_row)
            .collect();
    }

    let account_id = account_id.to_string();
    let table = entity.table();
    db.connection()
        .call(move |conn| -> Result<Vec<SyncRow>, rusqlite::Error> {
            let mut stmt = conn.prepare(&format!(
                "SELECT seq, id, data FROM {table}
                 WHERE account_id = ?1 AND seq > ?2
                 ORDER BY seq ASC LIMIT ?3"
            ))?;
            let rows = stmt.query_map(params![account_id, since, limit], sync_row_from_row)?;
            rows.collect()
        })
        .await
        .map_err(crate::database::map_tr_err)
}

fn event_row(event: tether_core::Event) -> Result<SyncRow, TetherError> {
    let seq = event.seq;
    let id = event.id.clone();
    let data = serde_json::to_value(&event).map_err(|e| TetherError::Internal(e.to_string()))?;
    Ok(SyncRow { seq, id, data })
}

fn sync_row_from_row(row: &rusqlite::Row<'_>) -> Result<SyncRow, rusqlite::Error> {
    let data: String = row.get(2)?;
    Ok(SyncRow {
        seq: row.get(0)?,
        id: row.get(1)?,
        data: decode_json(2, &data)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use proptest::prelude::*;
    use serde_json::json;
    use tether_core::{EventType, NewEvent};

    fn event(id: &str, account: &str) -> NewEvent {
        NewEvent {
            id: id.to_string(),
            event_type: EventType::Presence,
            account_id: account.to_string(),
            conversation_id: None,
            external_message_id: None,
            payload: json!({}),
            attachment_ref: None,
            timestamp: Utc::now(),
        }
    }

    async fn write(db: &Database, event_id: &str, account: &str, entity: EntityWrite) {
        events::append_with_projection(db, event(event_id, account), vec![entity])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn upsert_merges_and_moves_row_to_new_seq() {
        let db = Database::open_in_memory().await.unwrap();
        write(
            &db,
            "e1",
            "acct",
            EntityWrite::new(EntityType::Messages, "m1", json!({"text": "hi", "status": "sent"})),
        )
        .await;
        write(
            &db,
            "e2",
            "acct",
            EntityWrite::new(EntityType::Messages, "m2", json!({"text": "yo"})),
        )
        .await;
        write(
            &db,
            "e3",
            "acct",
            EntityWrite::new(EntityType::Messages, "m1", json!({"status": "read"})),
        )
        .await;

        let rows = pull(&db, "acct", EntityType::Messages, 0, 10).await.unwrap();
        let ids: Vec<(&str, i64)> = rows.iter().map(|r| (r.id.as_str(), r.seq)).collect();
        assert_eq!(ids, vec![("m2", 2), ("m1", 3)]);
        assert_eq!(rows[1].data, json!({"text": "hi", "status": "read"}));
    }

    #[tokio::test]
    async fn pull_isolates_accounts_and_tables() {
        let db = Database::open_in_memory().await.unwrap();
        write(&db, "e1", "a", EntityWrite::new(EntityType::Contacts, "k1", json!({}))).await;
        write(&db, "e2", "b", EntityWrite::new(EntityType::Contacts, "k1", json!({}))).await;
        write(&db, "e3", "a", EntityWrite::new(EntityType::Media, "x", json!({}))).await;

        let a = pull(&db, "a", EntityType::Contacts, 0, 10).await.unwrap();
        assert_eq!(a.len(), 1);
        assert_eq!(a[0].seq, 1);
        let b = pull(&db, "b", EntityType::Contacts, 0, 10).await.unwrap();
        assert_eq!(b[0].seq, 2);
        let media = pull(&db, "a", EntityType::Media, 0, 10).await.unwrap();
        assert_eq!(media[0].seq, 1);
    }

    #[tokio::test]
    async fn events_are_pullable_as_entities() {
        let db = Database::open_in_memory().await.unwrap();
        events::append_event(&db, event("p1", "acct")).await.unwrap();
        events::append_event(&db, event("p2", "acct")).await.unwrap();

        let rows = pull(&db, "acct", EntityType::Events, 1, 10).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, "p2");
        assert_eq!(rows[0].data["event_type"], "presence");

        let row = get_entity(&db, "acct", EntityType::Events, "p1").await.unwrap();
        assert_eq!(row.map(|r| r.seq), Some(1));
        let foreign = get_entity(&db, "other", EntityType::Events, "p1").await.unwrap();
        assert!(foreign.is_none());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        /// Any page sequence drawn with arbitrary limits visits every row exactly
        /// once, in ascending order.
        #[test]
        fn paging_visits_every_row_once(
            writes in proptest::collection::vec((0usize..3, 0usize..6), 1..40),
            limits in proptest::collection::vec(1u32..7, 1..20),
        ) {
            let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
            rt.block_on(async {
                let db = Database::open_in_memory().await.unwrap();
                let accounts = ["a", "b", "c"];
                for (n, (account, id)) in writes.iter().enumerate() {
                    write(
                        &db,
                        &format!("e{n}"),
                        accounts[*account],
                        EntityWrite::new(EntityType::Conversations, format!("c{id}"), json!({"n": n})),
                    )
                    .await;
                }

                let expected = pull(&db, "a", EntityType::Conversations, 0, 1000).await.unwrap();
                let mut seen = Vec::new();
                let mut cursor = 0;
                for limit in limits.iter().cycle() {
                    let page = pull(&db, "a", EntityType::Conversations, cursor, *limit).await.unwrap();
                    if page.is_empty() {
                        break;
                    }
                    assert!(page.len() <= *limit as usize);
                    assert!(page.windows(2).all(|w| w[0].seq < w[1].seq));
                    assert!(page[0].seq > cursor);
                    cursor = page.last().map(|r| r.seq).unwrap();
                    seen.extend(page);
                }
                assert_eq!(seen, expected);
            });
        }
    }
}
