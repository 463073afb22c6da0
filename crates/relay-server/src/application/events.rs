//! Typed notification bus.
//!
//! A thin wrapper over a `tokio::sync::broadcast` channel.  Subscribing
//! returns a receiver; dropping the receiver unsubscribes.  Publishing never
//! fails: with no subscribers the event is simply discarded.

use tokio::sync::broadcast;
use tracing::trace;

use crate::domain::RelayEvent;

/// Fan-out channel for [`RelayEvent`]s.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<RelayEvent>,
}

impl EventBus {
    /// Creates a bus that buffers up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publishes an event to every current subscriber.
    pub fn publish(&self, event: RelayEvent) {
        let topic = event.topic();
        match self.tx.send(event) {
            Ok(receivers) => trace!(topic, receivers, "event published"),
            Err(_) => trace!(topic, "event published with no subscribers"),
        }
    }

    /// Subscribes to all future events.
    pub fn subscribe(&self) -> broadcast::Receiver<RelayEvent> {
        self.tx.subscribe()
    }

    #[cfg(test)]
    pub(crate) fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
