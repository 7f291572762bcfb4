// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `tether status` command implementation.
//!
//! Reads persisted sessions straight from the database, so it works whether
//! or not a server is running. Live last-activity values are only as fresh
//! as the server's last write.

use chrono::{DateTime, Utc};
use serde::Serialize;

use tether_config::TetherConfig;
use tether_core::{ExternalSession, TetherError};
use tether_storage::SqliteStorage;
use tether_storage::queries::sessions;

/// One session line for `--json` mode.
#[derive(Debug, Serialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub account_id: String,
    pub integration: String,
    pub status: String,
    pub external_identity: Option<String>,
    pub reason: Option<String>,
    pub last_activity_at: DateTime<Utc>,
}

impl From<&ExternalSession> for SessionSummary {
    fn from(session: &ExternalSession) -> Self {
        Self {
            session_id: session.id.clone(),
            account_id: session.account_id.clone(),
            integration: session.integration.clone(),
            status: session.status.to_string(),
            external_identity: session.external_identity.clone(),
            reason: session.reason.clone(),
            last_activity_at: session.last_activity_at,
        }
    }
}

/// Run the `tether status` command.
///
/// With `account`, shows that account's latest session; otherwise every
/// session, newest first.
pub async fn run_status(
    config: &TetherConfig,
    account: Option<&str>,
    json: bool,
) -> Result<(), TetherError> {
    let storage = SqliteStorage::new(config.storage.clone());
    storage.initialize().await?;
    let db = storage.database()?;

    let found: Vec<ExternalSession> = match account {
        Some(account_id) => sessions::latest_session_for_account(&db, account_id)
            .await?
            .into_iter()
            .collect(),
        None => sessions::list_sessions(&db, None).await?,
    };
    let summaries: Vec<SessionSummary> = found.iter().map(SessionSummary::from).collect();

    if json {
        let rendered = serde_json::to_string_pretty(&summaries)
            .map_err(|e| TetherError::Internal(format!("failed to render status: {e}")))?;
        println!("{rendered}");
    } else {
        print!("{}", render_table(&summaries, Utc::now()));
    }
    Ok(())
}

/// Format seconds into a human-readable duration string.
fn format_age(secs: i64) -> String {
    let secs = secs.max(0);
    let days = secs / 86400;
    let hours = (secs % 86400) / 3600;
    let minutes = (secs % 3600) / 60;

    if days > 0 {
        format!("{days}d {hours}h {minutes}m")
    } else if hours > 0 {
        format!("{hours}h {minutes}m")
    } else {
        format!("{minutes}m")
    }
}

fn render_table(summaries: &[SessionSummary], now: DateTime<Utc>) -> String {
    let mut out = String::new();
    out.push_str("\n  tether status\n");
    out.push_str(&format!("  {}\n", "-".repeat(35)));
    if summaries.is_empty() {
        out.push_str("    No sessions recorded.\n\n");
        return out;
    }
    for s in summaries {
        let age = format_age((now - s.last_activity_at).num_seconds());
        out.push_str(&format!(
            "    {}  {:<14} account={} active {age} ago\n",
            s.session_id, s.status, s.account_id
        ));
        if let Some(identity) = &s.external_identity {
            out.push_str(&format!("      identity: {identity}\n"));
        }
        if let Some(reason) = &s.reason {
            out.push_str(&format!("      reason:   {reason}\n"));
        }
    }
    out.push('\n');
    out
}
