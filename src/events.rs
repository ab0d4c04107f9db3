//! Lifecycle event publishing.
//!
//! The engine publishes step and synchronization lifecycle events through a
//! broadcast channel. Subscribers (the synchronization event queue, test
//! harnesses) consume them without ever blocking the publisher.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// High-throughput event publisher for lifecycle events
#[derive(Debug, Clone)]
pub struct EventPublisher {
    sender: broadcast::Sender<PublishedEvent>,
}

/// Event that has been published
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishedEvent {
    pub name: String,
    pub description: String,
    pub published_at: DateTime<Utc>,
}

impl PublishedEvent {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            published_at: Utc::now(),
        }
    }
}

impl EventPublisher {
    /// Create a new event publisher with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event with the given name and description.
    ///
    /// Publishing with no subscribers is not an error; the event is simply
    /// dropped.
    pub fn publish(&self, name: impl Into<String>, description: impl Into<String>) {
        let event = PublishedEvent::new(name, description);
        let _ = self.sender.send(event);
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<PublishedEvent> {
        self.sender.subscribe()
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new(1000)
    }
}
