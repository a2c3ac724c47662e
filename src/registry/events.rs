//! Typed change events broadcast by a registry.
//!
//! Each registry owns one broadcast channel; any number of subscribers
//! (API layers, statistics, UIs) can listen independently.

use std::sync::Arc;
use tokio::sync::broadcast;

use crate::documents::Document;

#[derive(Debug, Clone, PartialEq)]
pub enum RegistryEvent {
    /// A document id was inserted for the first time.
    Created { document: Arc<Document> },
    /// An existing document was replaced.
    Updated { document: Arc<Document> },
    /// A document was removed.
    Deleted { id: String },
    /// Follows every created/updated/deleted event.
    Changed { id: String },
}

impl RegistryEvent {
    /// Id of the affected document.
    pub fn id(&self) -> &str {
        match self {
            RegistryEvent::Created { document } | RegistryEvent::Updated { document } => {
                document.id()
            }
            RegistryEvent::Deleted { id } | RegistryEvent::Changed { id } => id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            RegistryEvent::Created { .. } => "created",
            RegistryEvent::Updated { .. } => "updated",
            RegistryEvent::Deleted { .. } => "deleted",
            RegistryEvent::Changed { .. } => "changed",
        }
    }
}

/// Fan-out of registry events to subscribers.
#[derive(Debug, Clone)]
pub struct EventBroadcaster {
    sender: broadcast::Sender<RegistryEvent>,
}

impl EventBroadcaster {
    /// Create a broadcaster with the given channel capacity.
    ///
    /// Subscribers that fall more than `capacity` events behind observe
    /// `RecvError::Lagged` and skip ahead.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Send an event to all current subscribers.
    pub fn send(&self, event: RegistryEvent) {
        let kind = event.kind();
        match self.sender.send(event) {
            Ok(count) => {
                crate::debug_event!("registry", "sent", "{kind} to {count} subscribers");
            }
            Err(_) => {
                // No receivers, this is fine
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_without_subscribers() {
        let broadcaster = EventBroadcaster::new(4);
        broadcaster.send(RegistryEvent::Changed { id: "E1".into() });
        assert_eq!(broadcaster.subscriber_count(), 0);
    }

    #[test]
    fn test_subscribers_receive_in_order() {
        let broadcaster = EventBroadcaster::new(8);
        let mut rx = broadcaster.subscribe();

        broadcaster.send(RegistryEvent::Deleted { id: "E1".into() });
        broadcaster.send(RegistryEvent::Changed { id: "E1".into() });

        assert_eq!(rx.try_recv().unwrap().kind(), "deleted");
        let changed = rx.try_recv().unwrap();
        assert_eq!(changed.kind(), "changed");
        assert_eq!(changed.id(), "E1");
        assert!(rx.try_recv().is_err());
    }
}
