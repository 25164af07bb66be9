//! Live broadcast hub
//!
//! One-to-many push channel from the run store to connected observers.
//! Publishing never blocks: each observer has its own bounded buffer and a
//! slow observer only ever loses its own messages.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use testdeck_common::{PushMessage, RunState};
use tokio::sync::broadcast;
use tracing::{debug, trace};
use uuid::Uuid;

/// Publish side of the push channel plus the observer registry
pub struct Hub {
    sender: broadcast::Sender<PushMessage>,
    /// Observer id to connection time
    observers: Arc<DashMap<Uuid, DateTime<Utc>>>,
}

impl Hub {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            observers: Arc::new(DashMap::new()),
        }
    }

    /// Deliver a message to every currently subscribed observer.
    pub fn publish(&self, message: PushMessage) {
        let kind = message.kind();
        match self.sender.send(message) {
            Ok(receivers) => trace!("Published {} to {} observer(s)", kind, receivers),
            // No observers connected; nothing is retained.
            Err(_) => trace!("Dropped {} (no observers)", kind),
        }
    }

    /// Register a new observer. The caller supplies the snapshot taken at the
    /// same instant so that it precedes every later message.
    pub fn subscribe(&self, snapshot: RunState) -> Subscription {
        let id = Uuid::new_v4();
        self.observers.insert(id, Utc::now());
        debug!("Observer {} joined ({} connected)", id, self.observers.len());

        Subscription {
            id,
            snapshot: Some(snapshot),
            receiver: self.sender.subscribe(),
            registry: self.observers.clone(),
        }
    }

    /// Restart a lagging observer from `snapshot`. The old receiver still
    /// holds messages the snapshot already reflects, so it is replaced.
    pub fn resync(&self, subscription: &mut Subscription, snapshot: RunState) {
        subscription.receiver = self.sender.subscribe();
        subscription.snapshot = Some(snapshot);
        debug!("Observer {} resynced", subscription.id);
    }

    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }
}

/// What an observer sees next
#[derive(Debug)]
pub enum Delivery {
    Message(PushMessage),
    /// The observer fell behind and this many messages were discarded.
    Lagged(u64),
    Closed,
}

/// An observer's end of the push channel.
///
/// Dropping it unregisters the observer.
pub struct Subscription {
    id: Uuid,
    snapshot: Option<RunState>,
    receiver: broadcast::Receiver<PushMessage>,
    registry: Arc<DashMap<Uuid, DateTime<Utc>>>,
}

impl Subscription {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The first call yields the join snapshot as a `state` message.
    pub async fn next(&mut self) -> Delivery {
        if let Some(snapshot) = self.snapshot.take() {
            return Delivery::Message(PushMessage::State(snapshot));
        }
        match self.receiver.recv().await {
            Ok(message) => Delivery::Message(message),
            Err(broadcast::error::RecvError::Lagged(n)) => Delivery::Lagged(n),
            Err(broadcast::error::RecvError::Closed) => Delivery::Closed,
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some((_, connected_at)) = self.registry.remove(&self.id) {
            debug!(
                "Observer {} left after {}s ({} connected)",
                self.id,
                (Utc::now() - connected_at).num_seconds(),
                self.registry.len()
            );
        }
    }
}
