// SPDX-FileCopyrightText: 2026 Tether Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-account notification fan-out.
//!
//! Each realtime client holds a [`Subscription`] on its account's topic.
//! Publishing never blocks: every subscriber has a bounded queue, and a
//! subscriber whose queue is full is dropped from the topic and flagged as
//! overflowed so its connection can be closed. Notifications are hints; a
//! dropped client recovers by pulling from its saved cursor.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use tether_core::types::Notification;
use tether_core::ChangeNotifier;

struct Slot {
    tx: mpsc::Sender<Notification>,
    overflowed: CancellationToken,
}

struct Inner {
    topics: DashMap<String, HashMap<u64, Slot>>,
    next_id: AtomicU64,
    capacity: usize,
}

impl Inner {
    fn unsubscribe(&self, account_id: &str, id: u64) {
        if let Some(mut topic) = self.topics.get_mut(account_id) {
            topic.remove(&id);
        }
        self.topics.remove_if(account_id, |_, topic| topic.is_empty());
    }
}

/// Fan-out hub shared by every publisher and realtime connection.
#[derive(Clone)]
pub struct NotificationHub {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for NotificationHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationHub")
            .field("topics", &self.inner.topics.len())
            .field("capacity", &self.inner.capacity)
            .finish()
    }
}

impl NotificationHub {
    /// Create a hub whose subscribers each buffer up to `capacity` notifications.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                topics: DashMap::new(),
                next_id: AtomicU64::new(1),
                capacity: capacity.max(1),
            }),
        }
    }

    /// Register a subscriber on `account_id`'s topic.
    pub fn subscribe(&self, account_id: &str) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.inner.capacity);
        let overflowed = CancellationToken::new();
        self.inner
            .topics
            .entry(account_id.to_string())
            .or_default()
            .insert(
                id,
                Slot {
                    tx,
                    overflowed: overflowed.clone(),
                },
            );
        debug!(account_id, subscriber = id, "realtime subscriber registered");
        Subscription {
            id,
            account_id: account_id.to_string(),
            rx,
            overflowed,
            hub: Arc::downgrade(&self.inner),
        }
    }

    /// Offer a notification to every subscriber of `account_id`.
    ///
    /// Returns how many subscribers accepted it. Subscribers with a full queue
    /// are removed and flagged; closed ones are pruned.
    pub fn publish(&self, account_id: &str, seq: i64) -> usize {
        let mut delivered = 0;
        if let Some(mut topic) = self.inner.topics.get_mut(account_id) {
            topic.retain(|id, slot| {
                let notification = Notification {
                    account_id: account_id.to_string(),
                    seq,
                };
                match slot.tx.try_send(notification) {
                    Ok(()) => {
                        delivered += 1;
                        true
                    }
                    Err(TrySendError::Full(_)) => {
                        warn!(account_id, subscriber = *id, "slow consumer dropped");
                        metrics::counter!("tether_notify_overflow_total").increment(1);
                        slot.overflowed.cancel();
                        false
                    }
                    Err(TrySendError::Closed(_)) => false,
                }
            });
        }
        self.inner
            .topics
            .remove_if(account_id, |_, topic| topic.is_empty());
        metrics::counter!("tether_notify_published_total").increment(1);
        delivered
    }

    /// Number of live subscribers on `account_id`'s topic.
    pub fn subscriber_count(&self, account_id: &str) -> usize {
        self.inner
            .topics
            .get(account_id)
            .map_or(0, |topic| topic.len())
    }

    /// Drop every subscriber. Pending receivers drain and then see `None`.
    pub fn close_all(&self) {
        self.inner.topics.clear();
    }
}

impl ChangeNotifier for NotificationHub {
    fn notify(&self, account_id: &str, seq: i64) {
        self.publish(account_id, seq);
    }
}

/// A realtime client's view of its account topic. Dropping it unsubscribes.
pub struct Subscription {
    id: u64,
    account_id: String,
    rx: mpsc::Receiver<Notification>,
    overflowed: CancellationToken,
    hub: Weak<Inner>,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("account_id", &self.account_id)
            .field("overflowed", &self.is_overflowed())
            .finish()
    }
}

impl Subscription {
    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    /// Next notification. `None` once the subscriber overflowed or the hub
    /// dropped it; buffered notifications are discarded after an overflow.
    pub async fn recv(&mut self) -> Option<Notification> {
        if self.overflowed.is_cancelled() {
            return None;
        }
        tokio::select! {
            biased;
            _ = self.overflowed.cancelled() => None,
            next = self.rx.recv() => next,
        }
    }

    /// Whether the hub dropped this subscriber for falling behind.
    pub fn is_overflowed(&self) -> bool {
        self.overflowed.is_cancelled()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.unsubscribe(&self.account_id, self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_reaches_only_the_account_topic() {
        let hub = NotificationHub::new(8);
        let mut a1 = hub.subscribe("a");
        let mut a2 = hub.subscribe("a");
        let b = hub.subscribe("b");

        assert_eq!(hub.publish("a", 12), 2);
        assert_eq!(a1.recv().await.unwrap().seq, 12);
        let n = a2.recv().await.unwrap();
        assert_eq!(n.account_id, "a");
        assert_eq!(n.seq, 12);
        assert_eq!(hub.subscriber_count("b"), 1);
        drop(b);
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_a_noop() {
        let hub = NotificationHub::new(8);
        assert_eq!(hub.publish("nobody", 1), 0);
        assert_eq!(hub.subscriber_count("nobody"), 0);
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn full_queue_drops_the_slow_subscriber_only() {
        let hub = NotificationHub::new(2);
        let mut slow = hub.subscribe("a");
        let mut fast = hub.subscribe("a");

        hub.publish("a", 1);
        assert_eq!(fast.recv().await.unwrap().seq, 1);
        hub.publish("a", 2);
        assert_eq!(fast.recv().await.unwrap().seq, 2);

        // `slow` has two buffered; the third publish overflows it.
        assert_eq!(hub.publish("a", 3), 1);
        assert!(slow.is_overflowed());
        assert!(!fast.is_overflowed());
        assert!(slow.recv().await.is_none());
        assert_eq!(fast.recv().await.unwrap().seq, 3);
        assert_eq!(hub.subscriber_count("a"), 1);
        assert!(logs_contain("slow consumer dropped"));

        // Publisher keeps going without blocking.
        assert_eq!(hub.publish("a", 4), 1);
    }

    #[tokio::test]
    async fn resubscribe_after_overflow_receives_new_notifications() {
        let hub = NotificationHub::new(1);
        let slow = hub.subscribe("a");
        hub.publish("a", 1);
        hub.publish("a", 2);
        assert!(slow.is_overflowed());
        drop(slow);

        let mut again = hub.subscribe("a");
        hub.publish("a", 3);
        assert_eq!(again.recv().await.unwrap().seq, 3);
    }

    #[tokio::test]
    async fn dropping_subscription_unsubscribes() {
        let hub = NotificationHub::new(4);
        let sub = hub.subscribe("a");
        assert_eq!(hub.subscriber_count("a"), 1);
        drop(sub);
        assert_eq!(hub.subscriber_count("a"), 0);
    }

    #[tokio::test]
    async fn close_all_ends_every_subscription() {
        let hub = NotificationHub::new(4);
        let mut sub = hub.subscribe("a");
        hub.publish("a", 9);
        hub.close_all();
        assert_eq!(sub.recv().await.unwrap().seq, 9);
        assert!(sub.recv().await.is_none());
        assert!(!sub.is_overflowed());
    }

    #[tokio::test]
    async fn works_as_change_notifier() {
        let hub = NotificationHub::new(4);
        let mut sub = hub.subscribe("a");
        let notifier: Arc<dyn ChangeNotifier> = Arc::new(hub.clone());
        notifier.notify("a", 5);
        assert_eq!(sub.recv().await.unwrap().seq, 5);
    }
}
