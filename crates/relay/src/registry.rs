// Room registry: which connections are in which room, and the broadcast
// channel each room publishes on.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{broadcast, RwLock};
use tracing::warn;
use uuid::Uuid;

use crate::envelope::Envelope;
use crate::metrics;
use crate::room::RoomKey;

/// Per-room channel capacity. Subscribers that fall further behind skip the
/// oldest envelopes.
const ROOM_CHANNEL_CAPACITY: usize = 1024;

struct RoomEntry {
    sender: broadcast::Sender<Arc<Envelope>>,
    connections: HashSet<Uuid>,
}

#[derive(Clone, Default)]
pub struct RoomRegistry {
    rooms: Arc<RwLock<HashMap<RoomKey, RoomEntry>>>,
}

impl RoomRegistry {
    /// Adds `connection_id` to the room, creating the room on first use.
    /// Subscribing twice keeps a single membership entry.
    pub async fn subscribe(&self, room: RoomKey, connection_id: Uuid) -> RoomSubscription {
        let mut rooms = self.rooms.write().await;
        let entry = rooms.entry(room).or_insert_with(|| RoomEntry {
            sender: broadcast::channel(ROOM_CHANNEL_CAPACITY).0,
            connections: HashSet::new(),
        });
        entry.connections.insert(connection_id);

        RoomSubscription { room, connection_id, receiver: entry.sender.subscribe() }
    }

    /// Removes `connection_id` from the room. The room goes away with its last
    /// connection. Unknown rooms or connections are ignored.
    pub async fn unsubscribe(&self, room: RoomKey, connection_id: Uuid) {
        let mut rooms = self.rooms.write().await;
        let Some(entry) = rooms.get_mut(&room) else {
            return;
        };
        entry.connections.remove(&connection_id);
        if entry.connections.is_empty() {
            rooms.remove(&room);
        }
    }

    /// Hands the envelope to every current subscriber of the room and returns
    /// how many there were. Publishing to an empty room is not an error.
    pub async fn publish(&self, room: RoomKey, envelope: Envelope) -> usize {
        let rooms = self.rooms.read().await;
        let Some(entry) = rooms.get(&room) else {
            return 0;
        };
        entry.sender.send(Arc::new(envelope)).unwrap_or(0)
    }

    pub async fn subscriber_count(&self, room: RoomKey) -> usize {
        self.rooms.read().await.get(&room).map_or(0, |entry| entry.connections.len())
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }
}

/// One connection's view of a room's envelope stream.
pub struct RoomSubscription {
    room: RoomKey,
    connection_id: Uuid,
    receiver: broadcast::Receiver<Arc<Envelope>>,
}

impl RoomSubscription {
    pub fn room(&self) -> RoomKey {
        self.room
    }

    /// Next envelope published to the room, in publish order. Returns `None`
    /// once the room has been torn down.
    pub async fn recv(&mut self) -> Option<Arc<Envelope>> {
        loop {
            match self.receiver.recv().await {
                Ok(envelope) => return Some(envelope),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(
                        connection_id = %self.connection_id,
                        room = %self.room,
                        skipped,
                        "subscriber lagged behind room broadcast"
                    );
                    metrics::record_lagged(skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deleted(id: Uuid) -> Envelope {
        Envelope::chat_message_deleted(id)
    }

    #[tokio::test]
    async fn publish_reaches_every_subscriber_in_order() {
        let registry = RoomRegistry::default();
        let room = RoomKey::Chat(Uuid::new_v4());
        let mut first = registry.subscribe(room, Uuid::new_v4()).await;
        let mut second = registry.subscribe(room, Uuid::new_v4()).await;
        let ids = [Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4()];

        for id in ids {
            assert_eq!(registry.publish(room, deleted(id)).await, 2);
        }

        for subscription in [&mut first, &mut second] {
            for id in ids {
                let envelope = subscription.recv().await.expect("envelope");
                assert_eq!(envelope.target_id(), id);
            }
        }
    }

    #[tokio::test]
    async fn publish_to_empty_room_is_a_no_op() {
        let registry = RoomRegistry::default();
        assert_eq!(registry.publish(RoomKey::Notifications, deleted(Uuid::new_v4())).await, 0);
        assert_eq!(registry.room_count().await, 0);
    }

    #[tokio::test]
    async fn rooms_are_isolated() {
        let registry = RoomRegistry::default();
        let (a, b) = (RoomKey::Chat(Uuid::new_v4()), RoomKey::Chat(Uuid::new_v4()));
        let mut in_a = registry.subscribe(a, Uuid::new_v4()).await;
        let _in_b = registry.subscribe(b, Uuid::new_v4()).await;

        let id = Uuid::new_v4();
        registry.publish(b, deleted(id)).await;
        registry.publish(a, deleted(Uuid::new_v4())).await;

        let envelope = in_a.recv().await.expect("envelope");
        assert_ne!(envelope.target_id(), id);
    }

    #[tokio::test]
    async fn subscribe_and_unsubscribe_are_idempotent() {
        let registry = RoomRegistry::default();
        let room = RoomKey::Notifications;
        let connection_id = Uuid::new_v4();

        let _first = registry.subscribe(room, connection_id).await;
        let _second = registry.subscribe(room, connection_id).await;
        assert_eq!(registry.subscriber_count(room).await, 1);

        registry.unsubscribe(room, connection_id).await;
        registry.unsubscribe(room, connection_id).await;
        assert_eq!(registry.subscriber_count(room).await, 0);
        assert_eq!(registry.room_count().await, 0);
    }

    #[tokio::test]
    async fn room_survives_until_last_connection_leaves() {
        let registry = RoomRegistry::default();
        let room = RoomKey::Chat(Uuid::new_v4());
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let _sub_a = registry.subscribe(room, a).await;
        let mut sub_b = registry.subscribe(room, b).await;

        registry.unsubscribe(room, a).await;
        assert_eq!(registry.room_count().await, 1);

        let id = Uuid::new_v4();
        registry.publish(room, deleted(id)).await;
        assert_eq!(sub_b.recv().await.expect("envelope").target_id(), id);

        registry.unsubscribe(room, b).await;
        assert_eq!(registry.room_count().await, 0);
    }

    #[tokio::test]
    async fn lagging_subscriber_skips_and_continues() {
        let registry = RoomRegistry::default();
        let room = RoomKey::Notifications;
        let mut subscription = registry.subscribe(room, Uuid::new_v4()).await;

        let mut last = Uuid::nil();
        for _ in 0..(ROOM_CHANNEL_CAPACITY + 10) {
            last = Uuid::new_v4();
            registry.publish(room, deleted(last)).await;
        }

        let mut seen = 0;
        let mut latest = None;
        while seen < ROOM_CHANNEL_CAPACITY {
            latest = subscription.recv().await.map(|envelope| envelope.target_id());
            seen += 1;
        }
        assert_eq!(latest, Some(last));
    }
}
