//! Event bus announcing metadata cache changes.
//!
//! Uses tokio::sync::broadcast for pub/sub. Listeners that only want to
//! render "what is loaded where" can follow these events instead of
//! polling the cache.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::metadata::TrackMetadata;

/// Cache changes published by the tracking engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum MetadataEvent {
    /// Metadata was installed (or replaced) for a device.
    Updated {
        device_number: u8,
        metadata: Box<TrackMetadata>,
    },
    /// The device no longer has a known track (unloaded, left the network,
    /// or the engine stopped).
    Cleared { device_number: u8 },
}

/// Event bus handle for publishing and subscribing.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<MetadataEvent>,
}

impl EventBus {
    /// Create a new event bus with the specified capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: MetadataEvent) {
        // Ignore send errors (no subscribers)
        let _ = self.sender.send(event);
    }

    /// Subscribe to all events.
    pub fn subscribe(&self) -> broadcast::Receiver<MetadataEvent> {
        self.sender.subscribe()
    }

    /// Number of current subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Shared event bus wrapped in Arc for thread-safe sharing.
pub type SharedBus = Arc<EventBus>;

/// Create a new shared event bus with default capacity.
pub fn create_bus() -> SharedBus {
    Arc::new(EventBus::default())
}
