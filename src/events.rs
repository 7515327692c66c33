// Fire-and-forget notification bus between cluster state machines and
// their observers (UI windows, log sinks).
use serde::Serialize;
use tokio::sync::broadcast;

use crate::models::cluster::ClusterId;

/// Notifications emitted by a cluster's state machine.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum ClusterEvent {
    /// Human-readable connection progress or failure.
    ConnectUpdate {
        cluster_id: ClusterId,
        message: String,
        is_error: bool,
    },
    /// Listing namespaces was forbidden and no fallback namespace exists;
    /// the user has to declare accessible namespaces by hand.
    ListNamespacesForbidden { cluster_id: ClusterId },
}

/// Broadcast bus. Cheap to clone; senders never block and never fail —
/// an event with no subscribers is simply dropped.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ClusterEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClusterEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: ClusterEvent) {
        // Err only means nobody is listening right now.
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn emit_without_subscribers_is_a_no_op() {
        let bus = EventBus::default();
        bus.emit(ClusterEvent::ListNamespacesForbidden {
            cluster_id: "c-1".into(),
        });
    }

    #[tokio::test]
    async fn subscribers_see_events_in_order() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();

        bus.emit(ClusterEvent::ConnectUpdate {
            cluster_id: "c-1".into(),
            message: "Starting connection ...".into(),
            is_error: false,
        });
        bus.emit(ClusterEvent::ListNamespacesForbidden {
            cluster_id: "c-1".into(),
        });

        assert!(matches!(
            rx.recv().await.unwrap(),
            ClusterEvent::ConnectUpdate { is_error: false, .. }
        ));
        assert!(matches!(
            rx.recv().await.unwrap(),
            ClusterEvent::ListNamespacesForbidden { .. }
        ));
    }
}
