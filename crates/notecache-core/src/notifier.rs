// ABOUTME: Typed publish/subscribe for cache events over a tokio broadcast channel.
// ABOUTME: Subscriptions can filter to one event kind and unsubscribe by being dropped.

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use crate::event::{CacheEvent, EventKind};

/// Publishes cache events to every live subscription.
pub struct EventNotifier<T> {
    tx: broadcast::Sender<CacheEvent<T>>,
}

impl<T> Clone for EventNotifier<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T: Clone + Send + 'static> EventNotifier<T> {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Send an event. Having no subscribers is fine.
    pub fn publish(&self, event: CacheEvent<T>) {
        let kind = event.kind();
        let delivered = self.tx.send(event).unwrap_or(0);
        tracing::trace!(event = kind.name(), delivered, "published cache event");
    }

    /// Subscribe to every event.
    pub fn subscribe(&self) -> Subscription<T> {
        Subscription {
            rx: self.tx.subscribe(),
            kind: None,
        }
    }

    /// Subscribe to a single kind of event.
    pub fn on(&self, kind: EventKind) -> Subscription<T> {
        Subscription {
            rx: self.tx.subscribe(),
            kind: Some(kind),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// A live subscription. Dropping it (or calling `off`) unsubscribes.
pub struct Subscription<T> {
    rx: broadcast::Receiver<CacheEvent<T>>,
    kind: Option<EventKind>,
}

impl<T: Clone> Subscription<T> {
    /// Wait for the next matching event. Returns None once the cache has shut
    /// down and every earlier event has been received.
    pub async fn recv(&mut self) -> Option<CacheEvent<T>> {
        loop {
            match self.rx.recv().await {
                Ok(event) => {
                    if self.kind.is_none_or(|k| k == event.kind()) {
                        return Some(event);
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    // Snapshots supersede each other, so missing some is harmless.
                    tracing::warn!(skipped, "cache event subscriber lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant of `recv`. Returns None when nothing is queued.
    pub fn try_recv(&mut self) -> Option<CacheEvent<T>> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => {
                    if self.kind.is_none_or(|k| k == event.kind()) {
                        return Some(event);
                    }
                }
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "cache event subscriber lagged");
                }
                Err(_) => return None,
            }
        }
    }

    pub fn off(self) {}
}
