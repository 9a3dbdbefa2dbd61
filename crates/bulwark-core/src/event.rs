//! Typed event stream
//!
//! Components publish strongly typed events on an [`EventBus`]; hosts poll
//! them through a [`broadcast::Receiver`]. Publishing never blocks and never
//! fails the publisher.

use tokio::sync::broadcast;

/// Default number of buffered events per bus
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Broadcast channel carrying one component's events
#[derive(Debug, Clone)]
pub struct EventBus<E> {
    sender: broadcast::Sender<E>,
}

impl<E: Clone> EventBus<E> {
    /// Create bus with the given buffer capacity
    #[inline]
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish an event to all current subscribers
    ///
    /// Returns the number of subscribers that received it.
    pub fn publish(&self, event: E) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    /// Subscribe to events published from now on
    #[inline]
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<E> {
        self.sender.subscribe()
    }

    /// Number of live subscribers
    #[inline]
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl<E: Clone> Default for EventBus<E> {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}
