// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Background delivery of queued outbound actions.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tether_config::model::OutboxConfig;
use tether_core::{
    AppendOutcome, ChangeNotifier, OutboundSender, OutboxEntry, OutboxStatus, TetherError,
};
use tether_storage::queries::{events, outbox};
use tether_storage::{Database, RetryPolicy};

use crate::projection;

/// Polls the outbox and hands due entries to an [`OutboundSender`].
///
/// A delivered entry is recorded as a `message_sent` event before it is
/// marked `sent`, so a crash in between replays into a duplicate append
/// rather than a lost event.
pub struct OutboxWorker {
    db: Database,
    sender: Arc<dyn OutboundSender>,
    notifier: Arc<dyn ChangeNotifier>,
    policy: RetryPolicy,
    poll_interval: Duration,
    batch_size: u32,
}

impl OutboxWorker {
    pub fn new(
        db: Database,
        sender: Arc<dyn OutboundSender>,
        notifier: Arc<dyn ChangeNotifier>,
        config: &OutboxConfig,
    ) -> Self {
        Self {
            db,
            sender,
            notifier,
            policy: RetryPolicy::from(config),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            batch_size: config.batch_size,
        }
    }

    /// Poll until `cancel` fires. Entries left `sending` by a previous
    /// process are requeued first.
    pub async fn run(self, cancel: CancellationToken) {
        match outbox::recover_in_flight(&self.db, Utc::now()).await {
            Ok(0) => {}
            Ok(count) => info!(count, "requeued in-flight outbox entries"),
            Err(e) => warn!(error = %e, "failed to requeue in-flight outbox entries"),
        }

        loop {
            let delivered = match self.run_once().await {
                Ok(n) => n,
                Err(e) => {
                    warn!(error = %e, "outbox poll failed");
                    0
                }
            };
            // A full batch means more may be due; poll again immediately.
            if delivered < self.batch_size as usize {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(self.poll_interval) => {}
                }
            } else if cancel.is_cancelled() {
                break;
            }
        }
        debug!("outbox worker stopped");
    }

    /// Claim and attempt every due entry once. Returns how many were claimed.
    pub async fn run_once(&self) -> Result<usize, TetherError> {
        let due = outbox::claim_due(&self.db, Utc::now(), self.batch_size).await?;
        let claimed = due.len();
        for entry in due {
            let key = entry.idempotency_key.clone();
            // Left in `sending`; requeued on the next start.
            if let Err(e) = self.deliver(entry).await {
                warn!(idempotency_key = %key, error = %e, "failed to record outbox attempt");
            }
        }
        Ok(claimed)
    }

    async fn deliver(&self, entry: OutboxEntry) -> Result<(), TetherError> {
        let key = entry.idempotency_key.as_str();
        match self.sender.send(&entry).await {
            Ok(receipt) => {
                let projected = projection::sent_message(&entry, &receipt);
                let outcome = events::append_with_projection(
                    &self.db,
                    projected.event,
                    projected.writes,
                )
                .await?;
                outbox::mark_sent(&self.db, key, outcome.seq(), Utc::now()).await?;
                if let AppendOutcome::Appended(seq) = outcome {
                    self.notifier.notify(&entry.account_id, seq);
                }
                metrics::counter!("tether_outbox_sent_total").increment(1);
                debug!(idempotency_key = key, seq = outcome.seq(), "outbox entry sent");
            }
            Err(e) => {
                let status = outbox::record_failure(
                    &self.db,
                    key,
                    &e.to_string(),
                    !e.is_retryable(),
                    self.policy,
                    Utc::now(),
                )
                .await?;
                if status == OutboxStatus::Failed {
                    metrics::counter!("tether_outbox_failed_total").increment(1);
                    warn!(idempotency_key = key, error = %e, "outbox entry failed");
                } else {
                    metrics::counter!("tether_outbox_retried_total").increment(1);
                    debug!(idempotency_key = key, error = %e, "outbox entry scheduled for retry");
                }
            }
        }
        Ok(())
    }
}
