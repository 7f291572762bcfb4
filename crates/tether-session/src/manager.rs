// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Registry of live external sessions and the Connect/Status/Disconnect surface.
//!
//! The registry map is private to this module and guarded by one
//! reader/writer lock. Each [`ManagedSession`] carries its own mutex for
//! the fields that change on routine activity, so dispatchers never contend
//! on the registry lock. Every teardown (manual disconnect, sweep, terminal
//! protocol event, shutdown) goes through [`Inner::finish`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tether_config::model::SessionConfig;
use tether_core::types::{
    ConnectResponse, DisconnectOutcome, PairingCode, SendReceipt, SessionStatusReport,
};
use tether_core::{
    AppendOutcome, ChangeNotifier, EventType, ExternalSession, OutboundMessage, OutboundSender,
    OutboxEntry, ProtocolClient, ProtocolConnector, SendError, SessionStatus, TetherError,
};
use tether_storage::Database;
use tether_storage::queries::{events, sessions};

use crate::dispatch;
use crate::projection;

/// Session lifecycle timings.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Integration served by the configured connector.
    pub integration: String,
    /// Upper bound on how long `connect` blocks for the first pairing code.
    pub pairing_wait: Duration,
    /// Assumed code lifetime until the protocol reports its own expiry.
    pub pairing_code_ttl: Duration,
    /// How long a disconnected session keeps its client before eviction.
    pub disconnected_ttl: Duration,
    pub sweep_interval: Duration,
}

impl From<&SessionConfig> for SessionSettings {
    fn from(config: &SessionConfig) -> Self {
        Self {
            integration: config.integration.clone(),
            pairing_wait: config.pairing_wait(),
            pairing_code_ttl: config.pairing_code_ttl(),
            disconnected_ttl: config.disconnected_ttl(),
            sweep_interval: config.sweep_interval(),
        }
    }
}

/// How the protocol client is released during teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ClientClose {
    /// Revoke the pairing (manual disconnect).
    Logout,
    /// Close the transport, keep the pairing (sweep, shutdown, failures).
    Disconnect,
    /// The platform already closed it.
    Skip,
}

/// Mutable per-session fields, guarded by the session's own lock.
pub(crate) struct SessionState {
    pub(crate) record: ExternalSession,
    lifecycle_counter: u64,
}

/// A session with a live protocol client.
pub(crate) struct ManagedSession {
    pub(crate) id: String,
    pub(crate) account_id: String,
    pub(crate) client: Arc<dyn ProtocolClient>,
    pub(crate) state: Mutex<SessionState>,
    pub(crate) cancel: CancellationToken,
}

pub(crate) struct Inner {
    pub(crate) db: Database,
    connector: Arc<dyn ProtocolConnector>,
    pub(crate) notifier: Arc<dyn ChangeNotifier>,
    settings: SessionSettings,
    registry: RwLock<HashMap<String, Arc<ManagedSession>>>,
    root: CancellationToken,
}

/// Counts from one sweep pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Pairing sessions whose code lapsed unscanned.
    pub expired: usize,
    /// Disconnected sessions evicted after the TTL.
    pub evicted: usize,
}

/// Owns every live external session.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("integration", &self.inner.settings.integration)
            .finish_non_exhaustive()
    }
}

impl SessionManager {
    pub fn new(
        db: Database,
        connector: Arc<dyn ProtocolConnector>,
        notifier: Arc<dyn ChangeNotifier>,
        settings: SessionSettings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                db,
                connector,
                notifier,
                settings,
                registry: RwLock::new(HashMap::new()),
                root: CancellationToken::new(),
            }),
        }
    }

    /// Expire rows left non-terminal by a previous process. Their protocol
    /// clients died with it, so nothing can complete them.
    pub async fn recover_orphans(&self) -> Result<usize, TetherError> {
        let count =
            sessions::expire_orphaned(&self.inner.db, "process restarted", Utc::now()).await?;
        if count > 0 {
            info!(count, "expired sessions orphaned by a restart");
        }
        Ok(count)
    }

    /// Start a pairing handshake for `account_id` and wait, bounded, for its code.
    ///
    /// A `Timeout` leaves the handshake running until its own deadline; the
    /// session remains visible through [`status`](Self::status).
    pub async fn connect(&self, account_id: &str) -> Result<ConnectResponse, TetherError> {
        if account_id.trim().is_empty() {
            return Err(TetherError::InvalidInput("account id must not be empty".into()));
        }
        let inner = &self.inner;
        let now = Utc::now();
        let code_ttl = chrono::Duration::from_std(inner.settings.pairing_code_ttl)
            .map_err(|e| TetherError::Internal(e.to_string()))?;

        let mut record = ExternalSession {
            id: uuid::Uuid::new_v4().to_string(),
            account_id: account_id.to_string(),
            integration: inner.settings.integration.clone(),
            status: SessionStatus::Unauthenticated,
            external_identity: None,
            reason: None,
            pairing_expires_at: Some(now + code_ttl),
            created_at: now,
            connected_at: None,
            disconnected_at: None,
            last_activity_at: now,
        };

        if let sessions::InsertOutcome::Conflict(existing) =
            sessions::insert_session(&inner.db, &record).await?
        {
            debug!(account_id, existing = %existing.id, "connect rejected: session already active");
            return Err(TetherError::Conflict {
                session_id: existing.id,
                external_identity: existing.external_identity,
            });
        }

        let protocol = match inner.connector.open(account_id, &record.id).await {
            Ok(protocol) => protocol,
            Err(e) => {
                record.status = SessionStatus::Error;
                record.reason = Some(e.to_string());
                record.disconnected_at = Some(Utc::now());
                if let Err(save_err) = sessions::save_session(&inner.db, &record).await {
                    warn!(session_id = %record.id, error = %save_err, "failed to record handshake failure");
                }
                return Err(e);
            }
        };

        record.status = SessionStatus::Pairing;
        sessions::save_session(&inner.db, &record).await?;

        let session_id = record.id.clone();
        let session = Arc::new(ManagedSession {
            id: session_id.clone(),
            account_id: account_id.to_string(),
            client: protocol.client,
            state: Mutex::new(SessionState {
                record,
                lifecycle_counter: 0,
            }),
            cancel: inner.root.child_token(),
        });
        inner
            .registry
            .write()
            .await
            .insert(session_id.clone(), Arc::clone(&session));

        let (code_tx, mut code_rx) = mpsc::channel::<Result<PairingCode, TetherError>>(1);
        tokio::spawn(dispatch::run(
            Arc::clone(inner),
            session,
            protocol.events,
            code_tx,
        ));
        info!(account_id, session_id = %session_id, "pairing handshake started");

        let wait = inner.settings.pairing_wait;
        match tokio::time::timeout(wait, code_rx.recv()).await {
            Ok(Some(Ok(code))) => Ok(ConnectResponse {
                session_id,
                pairing_code: code.code,
                expires_at: code.expires_at,
            }),
            Ok(Some(Err(e))) => Err(e),
            Ok(None) => Err(TetherError::protocol(
                "handshake ended before a pairing code was issued",
            )),
            Err(_) => {
                warn!(account_id, session_id = %session_id, "no pairing code within the wait bound");
                Err(TetherError::Timeout { duration: wait })
            }
        }
    }

    /// Most recent session for `account_id`, preferring live in-memory state.
    pub async fn status(&self, account_id: &str) -> Result<SessionStatusReport, TetherError> {
        let Some(persisted) = sessions::latest_session_for_account(&self.inner.db, account_id).await?
        else {
            return Ok(SessionStatusReport {
                connected: false,
                session_id: None,
                status: None,
                external_identity: None,
                last_seen: None,
                reason: None,
            });
        };

        let live = self.inner.registry.read().await.get(&persisted.id).cloned();
        let record = match live {
            Some(session) => session.state.lock().await.record.clone(),
            None => persisted,
        };
        Ok(SessionStatusReport {
            connected: record.status == SessionStatus::Connected,
            session_id: Some(record.id),
            status: Some(record.status),
            external_identity: record.external_identity,
            last_seen: Some(record.last_activity_at),
            reason: record.reason,
        })
    }

    /// Log out and release a session. Unknown ids are a no-op.
    pub async fn disconnect(&self, session_id: &str) -> Result<DisconnectOutcome, TetherError> {
        let live = self.inner.registry.read().await.get(session_id).cloned();
        if let Some(session) = live {
            self.inner
                .finish(
                    &session,
                    SessionStatus::LoggedOut,
                    Some("disconnected by user".into()),
                    ClientClose::Logout,
                )
                .await?;
            return Ok(DisconnectOutcome::Disconnected);
        }

        match sessions::get_session(&self.inner.db, session_id).await? {
            Some(mut record) => {
                if !record.status.is_terminal() {
                    record.status = SessionStatus::LoggedOut;
                    record.reason = Some("disconnected by user".into());
                    record.disconnected_at.get_or_insert_with(Utc::now);
                    sessions::save_session(&self.inner.db, &record).await?;
                }
                Ok(DisconnectOutcome::Disconnected)
            }
            None => {
                debug!(session_id, "disconnect of unknown session ignored");
                Ok(DisconnectOutcome::Unknown)
            }
        }
    }

    /// Expire lapsed pairings and evict long-disconnected clients.
    pub async fn sweep_once(&self, now: DateTime<Utc>) -> SweepReport {
        let snapshot: Vec<Arc<ManagedSession>> =
            self.inner.registry.read().await.values().cloned().collect();
        let ttl = chrono::Duration::from_std(self.inner.settings.disconnected_ttl)
            .unwrap_or(chrono::Duration::MAX);

        let mut report = SweepReport::default();
        for session in snapshot {
            let verdict = sweep_verdict(&session.state.lock().await.record, now, ttl);
            let (reason, counter) = match verdict {
                Some(SweepVerdict::Expire) => ("pairing code expired", &mut report.expired),
                Some(SweepVerdict::Evict) => ("disconnected beyond ttl", &mut report.evicted),
                None => continue,
            };
            // The session may have moved on since the snapshot; judge it again
            // under its lock before tearing it down.
            let still_due = |record: &ExternalSession| sweep_verdict(record, now, ttl) == verdict;
            match self
                .inner
                .finish_if(
                    &session,
                    still_due,
                    SessionStatus::Expired,
                    Some(reason.into()),
                    ClientClose::Disconnect,
                )
                .await
            {
                Ok(true) => *counter += 1,
                Ok(false) => debug!(session_id = %session.id, "session recovered before sweep"),
                Err(e) => warn!(session_id = %session.id, error = %e, "sweep failed to release session"),
            }
        }

        if report != SweepReport::default() {
            info!(expired = report.expired, evicted = report.evicted, "session sweep");
        }
        report
    }

    /// Run [`sweep_once`](Self::sweep_once) every sweep interval until cancelled.
    pub fn spawn_sweeper(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let manager = self.clone();
        let period = self.inner.settings.sweep_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        manager.sweep_once(Utc::now()).await;
                    }
                }
            }
            debug!("session sweeper stopped");
        })
    }

    /// Close every live client without logging out. Sessions stay
    /// `disconnected` and are expired on the next start.
    pub async fn shutdown(&self) {
        let live: Vec<Arc<ManagedSession>> =
            self.inner.registry.read().await.values().cloned().collect();
        info!(count = live.len(), "disconnecting live sessions");
        for session in live {
            if let Err(e) = self
                .inner
                .finish(
                    &session,
                    SessionStatus::Disconnected,
                    Some("server shutdown".into()),
                    ClientClose::Disconnect,
                )
                .await
            {
                warn!(session_id = %session.id, error = %e, "failed to record shutdown");
            }
        }
        self.inner.root.cancel();
    }

    /// Number of sessions holding a protocol client.
    pub async fn live_count(&self) -> usize {
        self.inner.registry.read().await.len()
    }

    /// Current record for a session, live state first.
    pub async fn session(&self, session_id: &str) -> Result<Option<ExternalSession>, TetherError> {
        let live = self.inner.registry.read().await.get(session_id).cloned();
        match live {
            Some(session) => Ok(Some(session.state.lock().await.record.clone())),
            None => sessions::get_session(&self.inner.db, session_id).await,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SweepVerdict {
    Expire,
    Evict,
}

fn sweep_verdict(
    record: &ExternalSession,
    now: DateTime<Utc>,
    ttl: chrono::Duration,
) -> Option<SweepVerdict> {
    match record.status {
        SessionStatus::Pairing | SessionStatus::Unauthenticated
            if record.pairing_expires_at.is_some_and(|at| at <= now) =>
        {
            Some(SweepVerdict::Expire)
        }
        SessionStatus::Disconnected
            if record
                .disconnected_at
                .and_then(|at| at.checked_add_signed(ttl))
                .is_some_and(|deadline| deadline <= now) =>
        {
            Some(SweepVerdict::Evict)
        }
        _ => None,
    }
}

impl Inner {
    /// Unregister, stop the dispatcher, release the client, and persist the
    /// final status. Returns `false` if the session had already ended.
    pub(crate) async fn finish(
        &self,
        session: &Arc<ManagedSession>,
        status: SessionStatus,
        reason: Option<String>,
        close: ClientClose,
    ) -> Result<bool, TetherError> {
        self.finish_if(session, |_| true, status, reason, close).await
    }

    /// [`finish`](Self::finish), claimed only if `due` still holds for the
    /// record. The claim cancels the session under its state lock, so a
    /// dispatcher waiting on that lock sees the cancellation and backs off.
    pub(crate) async fn finish_if(
        &self,
        session: &Arc<ManagedSession>,
        due: impl FnOnce(&ExternalSession) -> bool,
        status: SessionStatus,
        reason: Option<String>,
        close: ClientClose,
    ) -> Result<bool, TetherError> {
        {
            let state = session.state.lock().await;
            if !due(&state.record) {
                return Ok(false);
            }
            session.cancel.cancel();
        }
        {
            let mut registry = self.registry.write().await;
            if registry
                .get(&session.id)
                .is_some_and(|current| Arc::ptr_eq(current, session))
            {
                registry.remove(&session.id);
            }
        }

        let released = match close {
            ClientClose::Logout => session.client.logout().await,
            ClientClose::Disconnect => session.client.disconnect().await,
            ClientClose::Skip => Ok(()),
        };
        if let Err(e) = released {
            warn!(session_id = %session.id, error = %e, "protocol client did not close cleanly");
        }

        let mut state = session.state.lock().await;
        if state.record.status.is_terminal() {
            return Ok(false);
        }
        let now = Utc::now();
        state.record.status = status;
        state.record.reason = reason;
        state.record.disconnected_at.get_or_insert(now);
        sessions::save_session(&self.db, &state.record).await?;

        match status {
            SessionStatus::LoggedOut => {
                self.record_lifecycle(&mut state, EventType::LoggedOut).await?;
            }
            SessionStatus::Disconnected => {
                self.record_lifecycle(&mut state, EventType::Disconnected).await?;
            }
            _ => {}
        }
        metrics::counter!("tether_sessions_ended_total", "status" => status.to_string())
            .increment(1);
        info!(session_id = %session.id, %status, "session released");
        Ok(true)
    }

    /// Append a lifecycle fact for the session and notify its account.
    pub(crate) async fn record_lifecycle(
        &self,
        state: &mut SessionState,
        event_type: EventType,
    ) -> Result<(), TetherError> {
        state.lifecycle_counter += 1;
        let record = &state.record;
        let event = projection::lifecycle_event(
            &record.account_id,
            &record.id,
            state.lifecycle_counter,
            event_type,
            serde_json::json!({
                "session_id": record.id,
                "integration": record.integration,
                "external_identity": record.external_identity,
                "reason": record.reason,
            }),
            Utc::now(),
        );
        if let AppendOutcome::Appended(seq) = events::append_event(&self.db, event).await? {
            self.notifier.notify(&record.account_id, seq);
        }
        Ok(())
    }
}

#[async_trait]
impl OutboundSender for SessionManager {
    async fn send(&self, entry: &OutboxEntry) -> Result<SendReceipt, SendError> {
        let candidates: Vec<Arc<ManagedSession>> = self
            .inner
            .registry
            .read()
            .await
            .values()
            .filter(|s| s.account_id == entry.account_id)
            .cloned()
            .collect();

        for session in candidates {
            if session.state.lock().await.record.status != SessionStatus::Connected {
                continue;
            }
            let message = OutboundMessage {
                idempotency_key: entry.idempotency_key.clone(),
                conversation_id: entry.conversation_id.clone(),
                payload: entry.payload.clone(),
            };
            let receipt = session.client.send_message(&message).await?;
            session.state.lock().await.record.last_activity_at = Utc::now();
            return Ok(receipt);
        }
        Err(SendError::Transient(format!(
            "no connected session for account {}",
            entry.account_id
        )))
    }
}
