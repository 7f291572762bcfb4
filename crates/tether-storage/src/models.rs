// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Row encoding helpers and storage-level value types.
//!
//! Timestamps are stored as fixed-width RFC 3339 strings in UTC with
//! millisecond precision, so lexicographic order in SQL equals time order.

use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use tether_core::EntityType;

/// A projected upsert into one of the syncable entity tables.
///
/// `data` is merged key-by-key into the existing row, so producers may
/// write partial documents (a receipt only touches `status`).
#[derive(Debug, Clone, PartialEq)]
pub struct EntityWrite {
    pub entity_type: EntityType,
    pub id: String,
    pub data: serde_json::Value,
}

impl EntityWrite {
    pub fn new(entity_type: EntityType, id: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            entity_type,
            id: id.into(),
            data,
        }
    }
}

/// Exponential retry schedule for failed outbox sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts after which a transient failure becomes `failed`.
    pub max_retries: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// Delay before attempt number `retry_count + 1`: `base * 2^(retry_count - 1)`,
    /// capped at `max_backoff`.
    pub fn backoff(&self, retry_count: u32) -> Duration {
        let exponent = retry_count.saturating_sub(1).min(31);
        self.base_backoff
            .checked_mul(1u32 << exponent)
            .map_or(self.max_backoff, |d| d.min(self.max_backoff))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(300),
        }
    }
}

impl From<&tether_config::model::OutboxConfig> for RetryPolicy {
    fn from(config: &tether_config::model::OutboxConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_backoff: Duration::from_millis(config.base_backoff_ms),
            max_backoff: Duration::from_secs(config.max_backoff_secs),
        }
    }
}

/// Encode a timestamp for storage.
pub fn encode_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Decode a stored timestamp from column `idx`.
pub(crate) fn decode_ts(idx: usize, raw: &str) -> Result<DateTime<Utc>, rusqlite::Error> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn decode_opt_ts(
    idx: usize,
    raw: Option<String>,
) -> Result<Option<DateTime<Utc>>, rusqlite::Error> {
    raw.map(|s| decode_ts(idx, &s)).transpose()
}

pub(crate) fn decode_json(idx: usize, raw: &str) -> Result<serde_json::Value, rusqlite::Error> {
    serde_json::from_str(raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Parse a strum-backed enum stored as text.
pub(crate) fn decode_enum<T>(idx: usize, raw: &str) -> Result<T, rusqlite::Error>
where
    T: FromStr<Err = strum::ParseError>,
{
    T::from_str(raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Shallow merge: top-level keys of `patch` overwrite those of `base`.
/// Non-object values replace wholesale.
pub(crate) fn merge_json(base: serde_json::Value, patch: serde_json::Value) -> serde_json::Value {
    match (base, patch) {
        (serde_json::Value::Object(mut base), serde_json::Value::Object(patch)) => {
            base.extend(patch);
            serde_json::Value::Object(base)
        }
        (_, patch) => patch,
    }
}
