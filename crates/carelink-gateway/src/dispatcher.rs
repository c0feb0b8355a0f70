use std::sync::Arc;

use tokio::sync::broadcast;

use carelink_types::events::{GatewayEvent, Room};

/// An event addressed to a single room. Connections subscribe to the shared
/// broadcast stream and filter by their room set.
#[derive(Debug, Clone)]
pub struct RoomEvent {
    pub room: Room,
    pub event: GatewayEvent,
}

/// Fans out events to all connected clients. Publishing never blocks and
/// never fails the caller: a send with no receivers is simply dropped, which
/// is the best-effort contract the route handlers rely on.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    broadcast_tx: broadcast::Sender<RoomEvent>,
}

impl Dispatcher {
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(DispatcherInner { broadcast_tx }),
        }
    }

    /// Subscribe to the event stream. Returns a broadcast receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<RoomEvent> {
        self.inner.broadcast_tx.subscribe()
    }

    /// Publish an event to a room.
    pub fn publish(&self, room: Room, event: GatewayEvent) {
        let _ = self.inner.broadcast_tx.send(RoomEvent { room, event });
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn published_events_reach_subscribers() {
        let dispatcher = Dispatcher::new();
        let mut rx = dispatcher.subscribe();

        let conversation_id = Uuid::new_v4();
        dispatcher.publish(
            Room::Conversation(conversation_id),
            GatewayEvent::UnreadCount {
                conversation_id,
                count: 2,
            },
        );

        let received = rx.recv().await.unwrap();
        assert_eq!(received.room, Room::Conversation(conversation_id));
        assert!(matches!(received.event, GatewayEvent::UnreadCount { count: 2, .. }));
    }

    #[test]
    fn publish_without_subscribers_is_a_noop() {
        let dispatcher = Dispatcher::new();
        let id = Uuid::new_v4();
        dispatcher.publish(
            Room::User(id),
            GatewayEvent::UnreadCount {
                conversation_id: id,
                count: 0,
            },
        );
    }
}
