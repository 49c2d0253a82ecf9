//! Notification bus for ledger changes
//!
//! Topic-keyed broadcast channels, one topic per bar (and per reserve).
//! Delivery is best-effort and at-most-once: a viewer that lags past the
//! channel capacity or disconnects must re-fetch the ledger. Nothing is
//! promised across topics.
//!
//! Services publish after their transaction commits, so two commits on one
//! row can reach `publish` in either order. The bus remembers the highest
//! row version it has delivered and strips older snapshots, which keeps each
//! row's events in commit order on every topic.
//!
//! Constructed once at startup and handed to every service that publishes.

use std::collections::HashMap;
use std::sync::Arc;

use shared::{LedgerEvent, Topic};
use tokio::sync::{broadcast, Mutex, RwLock};
use uuid::Uuid;

/// In-process pub/sub for ledger events. Cheap to clone.
#[derive(Clone)]
pub struct NotificationBus {
    channels: Arc<RwLock<HashMap<Topic, broadcast::Sender<LedgerEvent>>>>,
    /// Highest version published per ledger row
    versions: Arc<Mutex<HashMap<Uuid, i64>>>,
    capacity: usize,
}

/// A viewer's handle on one topic
pub struct Subscription {
    topic: Topic,
    receiver: broadcast::Receiver<LedgerEvent>,
}

impl Subscription {
    pub fn topic(&self) -> Topic {
        self.topic
    }

    pub async fn recv(&mut self) -> Result<LedgerEvent, broadcast::error::RecvError> {
        self.receiver.recv().await
    }
}

impl NotificationBus {
    /// Create a bus with default capacity (256 events per topic).
    pub fn new() -> Self {
        Self::with_capacity(256)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            channels: Arc::new(RwLock::new(HashMap::new())),
            versions: Arc::new(Mutex::new(HashMap::new())),
            capacity: capacity.max(1),
        }
    }

    /// Publish an event on its topic. Returns the number of viewers reached;
    /// zero when nobody is listening or every snapshot was already superseded.
    ///
    /// Call only after the transaction that produced the event has committed.
    pub async fn publish(&self, mut event: LedgerEvent) -> usize {
        // Held through the send so version filtering and delivery stay atomic
        let mut versions = self.versions.lock().await;
        if !event.retain_newer(&mut versions) {
            tracing::debug!(topic = %event.topic(), "dropping superseded ledger event");
            return 0;
        }

        let topic = event.topic();
        let channels = self.channels.read().await;
        match channels.get(&topic) {
            // A send error only means every receiver is gone
            Some(tx) => tx.send(event).unwrap_or(0),
            None => 0,
        }
    }

    /// Subscribe to a topic, creating its channel on first use.
    pub async fn subscribe(&self, topic: Topic) -> Subscription {
        let mut channels = self.channels.write().await;
        let tx = channels
            .entry(topic)
            .or_insert_with(|| broadcast::channel(self.capacity).0);
        Subscription {
            topic,
            receiver: tx.subscribe(),
        }
    }

    /// Drop a subscription and remove its topic if nobody else listens.
    pub async fn unsubscribe(&self, subscription: Subscription) {
        let topic = subscription.topic;
        drop(subscription);
        self.release(topic).await;
    }

    /// Remove `topic` if it has no receivers left. Other topics are untouched.
    pub async fn release(&self, topic: Topic) {
        let mut channels = self.channels.write().await;
        if channels
            .get(&topic)
            .is_some_and(|tx| tx.receiver_count() == 0)
        {
            channels.remove(&topic);
        }
    }

    pub async fn subscriber_count(&self, topic: Topic) -> usize {
        self.channels
            .read()
            .await
            .get(&topic)
            .map_or(0, |tx| tx.receiver_count())
    }

    #[cfg(test)]
    pub(crate) async fn has_topic(&self, topic: Topic) -> bool {
        self.channels.read().await.contains_key(&topic)
    }
}

impl Default for NotificationBus {
    fn default() -> Self {
        Self::new()
    }
}
