// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-session event dispatcher.
//!
//! One task per live session drains the protocol client's event channel in
//! order. Handshake events drive the session state machine; content events
//! are appended to the log with their projections and announced to the
//! account's subscribers.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use tether_core::types::PairingCode;
use tether_core::{AppendOutcome, EventType, ProtocolEvent, SessionStatus, TetherError};
use tether_storage::queries::{events, sessions};

use crate::manager::{ClientClose, Inner, ManagedSession};
use crate::projection;

/// Tries per content event before the session is failed.
const APPEND_ATTEMPTS: u32 = 5;
/// First retry delay; doubles after each failed attempt.
const APPEND_BACKOFF: Duration = Duration::from_millis(100);

/// The caller's side of the handshake: the first code or the first error,
/// whichever comes first. Later failures only touch session state.
struct Handshake {
    slot: Option<mpsc::Sender<Result<PairingCode, TetherError>>>,
    delivered: bool,
}

impl Handshake {
    fn offer(&mut self, code: PairingCode) {
        if self.delivered {
            return;
        }
        if let Some(slot) = self.slot.take() {
            self.delivered = slot.try_send(Ok(code)).is_ok();
        }
    }

    /// Returns whether the error reached the waiting caller.
    fn fail(&mut self, err: TetherError) -> bool {
        if self.delivered {
            return false;
        }
        match self.slot.take() {
            Some(slot) => slot.try_send(Err(err)).is_ok(),
            None => false,
        }
    }
}

enum Flow {
    Continue,
    Stop,
}

pub(crate) async fn run(
    inner: Arc<Inner>,
    session: Arc<ManagedSession>,
    mut events: mpsc::Receiver<ProtocolEvent>,
    slot: mpsc::Sender<Result<PairingCode, TetherError>>,
) {
    let mut handshake = Handshake {
        slot: Some(slot),
        delivered: false,
    };

    loop {
        let next = tokio::select! {
            biased;
            _ = session.cancel.cancelled() => break,
            next = events.recv() => next,
        };
        let Some(event) = next else {
            if let Err(e) = stream_closed(&inner, &session, &mut handshake).await {
                error!(session_id = %session.id, error = %e, "failed to record closed event stream");
            }
            break;
        };

        let kind = event.kind();
        match handle(&inner, &session, &mut handshake, event).await {
            Ok(Flow::Continue) => {}
            Ok(Flow::Stop) => break,
            Err(e) => {
                error!(session_id = %session.id, kind, error = %e, "failed to handle protocol event");
            }
        }
    }
    debug!(session_id = %session.id, "dispatcher stopped");
}

async fn handle(
    inner: &Inner,
    session: &Arc<ManagedSession>,
    handshake: &mut Handshake,
    event: ProtocolEvent,
) -> Result<Flow, TetherError> {
    match event {
        ProtocolEvent::PairingCode { code, expires_at } => {
            {
                let mut state = session.state.lock().await;
                if ended(session, &state) {
                    return Ok(Flow::Stop);
                }
                state.record.pairing_expires_at = Some(expires_at);
                if state.record.status == SessionStatus::Unauthenticated {
                    state.record.status = SessionStatus::Pairing;
                }
                sessions::save_session(&inner.db, &state.record).await?;
            }
            debug!(session_id = %session.id, %expires_at, "pairing code issued");
            handshake.offer(PairingCode { code, expires_at });
            Ok(Flow::Continue)
        }
        ProtocolEvent::PairTimeout => {
            handshake.fail(TetherError::protocol("pairing timed out before the code was scanned"));
            inner
                .finish(
                    session,
                    SessionStatus::Expired,
                    Some("pairing timed out".into()),
                    ClientClose::Disconnect,
                )
                .await?;
            Ok(Flow::Stop)
        }
        ProtocolEvent::PairError { reason } => {
            if !handshake.fail(TetherError::protocol(reason.clone())) {
                warn!(session_id = %session.id, %reason, "handshake failed after the pairing code was issued");
            }
            inner
                .finish(
                    session,
                    SessionStatus::Error,
                    Some(reason),
                    ClientClose::Disconnect,
                )
                .await?;
            Ok(Flow::Stop)
        }
        ProtocolEvent::Connected { external_id } => {
            let now = Utc::now();
            let mut state = session.state.lock().await;
            // Teardown cancels under this lock; a session it claimed stays ended.
            if ended(session, &state) {
                debug!(session_id = %session.id, "connected event after teardown ignored");
                return Ok(Flow::Stop);
            }
            state.record.status = SessionStatus::Connected;
            state.record.external_identity = Some(external_id);
            state.record.reason = None;
            state.record.pairing_expires_at = None;
            state.record.connected_at = Some(now);
            state.record.disconnected_at = None;
            state.record.last_activity_at = now;
            sessions::save_session(&inner.db, &state.record).await?;
            inner
                .record_lifecycle(&mut state, EventType::Connected)
                .await?;
            metrics::counter!("tether_sessions_connected_total").increment(1);
            info!(
                session_id = %session.id,
                external_identity = state.record.external_identity.as_deref().unwrap_or_default(),
                "session connected"
            );
            Ok(Flow::Continue)
        }
        ProtocolEvent::Disconnected { reason } => {
            let mut state = session.state.lock().await;
            if state.record.status != SessionStatus::Connected {
                debug!(session_id = %session.id, status = %state.record.status, "disconnect ignored");
                return Ok(Flow::Continue);
            }
            mark_disconnected(inner, &mut state, reason).await?;
            Ok(Flow::Continue)
        }
        ProtocolEvent::LoggedOut { reason } => {
            inner
                .finish(
                    session,
                    SessionStatus::LoggedOut,
                    Some(reason.unwrap_or_else(|| "logged out by platform".into())),
                    ClientClose::Skip,
                )
                .await?;
            Ok(Flow::Stop)
        }
        content @ (ProtocolEvent::Message(_)
        | ProtocolEvent::Receipt(_)
        | ProtocolEvent::Presence(_)
        | ProtocolEvent::ContactUpdate(_)
        | ProtocolEvent::GroupUpdate(_)) => {
            record_content_durably(inner, session, &content).await
        }
    }
}

fn ended(session: &ManagedSession, state: &crate::manager::SessionState) -> bool {
    session.cancel.is_cancelled() || state.record.status.is_terminal()
}

/// Append a content event, retrying while the log is unavailable. The
/// channel is not drained meanwhile, so later events keep their order. If
/// the write never lands the session is failed instead of skipping past it;
/// the platform redelivers unacknowledged content on the next connect.
async fn record_content_durably(
    inner: &Inner,
    session: &Arc<ManagedSession>,
    event: &ProtocolEvent,
) -> Result<Flow, TetherError> {
    let Some(projected) = projection::project(&session.account_id, event)? else {
        return Ok(Flow::Continue);
    };
    let mut backoff = APPEND_BACKOFF;
    let mut attempt = 1;
    loop {
        let err = match record_content(inner, session, event.kind(), projected.clone()).await {
            Ok(()) => return Ok(Flow::Continue),
            Err(e) => e,
        };
        if attempt >= APPEND_ATTEMPTS {
            error!(
                session_id = %session.id,
                kind = event.kind(),
                attempts = attempt,
                error = %err,
                "event log unavailable, failing session"
            );
            metrics::counter!("tether_append_failures_total").increment(1);
            inner
                .finish(
                    session,
                    SessionStatus::Error,
                    Some(format!("event log unavailable: {err}")),
                    ClientClose::Disconnect,
                )
                .await?;
            return Ok(Flow::Stop);
        }

        warn!(
            session_id = %session.id,
            kind = event.kind(),
            attempt,
            retry_in_ms = backoff.as_millis() as u64,
            error = %err,
            "append failed, retrying"
        );
        tokio::select! {
            biased;
            _ = session.cancel.cancelled() => return Ok(Flow::Stop),
            _ = tokio::time::sleep(backoff) => {}
        }
        attempt += 1;
        backoff = backoff.saturating_mul(2);
    }
}

async fn record_content(
    inner: &Inner,
    session: &ManagedSession,
    kind: &'static str,
    projected: projection::Projected,
) -> Result<(), TetherError> {
    let outcome =
        events::append_with_projection(&inner.db, projected.event, projected.writes).await?;

    // The event is durable from here on; activity bookkeeping is best effort.
    let now = Utc::now();
    let live = {
        let mut state = session.state.lock().await;
        let live = !state.record.status.is_terminal();
        if live {
            state.record.last_activity_at = now;
        }
        live
    };
    if live {
        if let Err(e) = sessions::touch_activity(&inner.db, &session.id, now).await {
            warn!(session_id = %session.id, error = %e, "failed to record session activity");
        }
    }

    match outcome {
        AppendOutcome::Appended(seq) => inner.notifier.notify(&session.account_id, seq),
        AppendOutcome::Duplicate(seq) => {
            debug!(session_id = %session.id, kind, seq, "replayed event ignored");
        }
    }
    Ok(())
}

async fn mark_disconnected(
    inner: &Inner,
    state: &mut crate::manager::SessionState,
    reason: Option<String>,
) -> Result<(), TetherError> {
    state.record.status = SessionStatus::Disconnected;
    state.record.reason = reason;
    state.record.disconnected_at = Some(Utc::now());
    sessions::save_session(&inner.db, &state.record).await?;
    inner
        .record_lifecycle(state, EventType::Disconnected)
        .await?;
    info!(session_id = %state.record.id, "session disconnected");
    Ok(())
}

/// The client dropped its event channel without a terminal event.
async fn stream_closed(
    inner: &Inner,
    session: &Arc<ManagedSession>,
    handshake: &mut Handshake,
) -> Result<(), TetherError> {
    let status = session.state.lock().await.record.status;
    match status {
        SessionStatus::Unauthenticated | SessionStatus::Pairing => {
            let reason = "event stream closed during pairing";
            handshake.fail(TetherError::protocol(reason));
            inner
                .finish(
                    session,
                    SessionStatus::Error,
                    Some(reason.into()),
                    ClientClose::Disconnect,
                )
                .await?;
        }
        SessionStatus::Connected => {
            let mut state = session.state.lock().await;
            if state.record.status == SessionStatus::Connected {
                mark_disconnected(inner, &mut state, Some("event stream closed".into())).await?;
            }
        }
        _ => {}
    }
    Ok(())
}
