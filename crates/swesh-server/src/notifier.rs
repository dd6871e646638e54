//! The realtime event boundary.
//!
//! Core operations publish [`RealtimeEvent`]s to named rooms through the
//! [`Notifier`] trait; the concrete [`RealtimeHub`] fans each room out to
//! its SSE subscribers over a `tokio::sync::broadcast` channel.  Publishing
//! to a room nobody is watching drops the event -- delivery is best-effort
//! and never gates persistence.

use std::collections::HashMap;
use std::sync::RwLock;

use tokio::sync::broadcast;

use swesh_core::RealtimeEvent;

/// Room-addressable publish, injected into the orchestration service.
pub trait Notifier: Send + Sync {
    fn publish(&self, room: &str, event: &RealtimeEvent);
}

/// In-process hub of per-room broadcast channels.
pub struct RealtimeHub {
    rooms: RwLock<HashMap<String, broadcast::Sender<String>>>,
    capacity: usize,
}

impl RealtimeHub {
    pub fn new(capacity: usize) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            capacity,
        }
    }

    /// Join a room, creating its channel lazily.  Dropping the receiver
    /// leaves the room; [`RealtimeHub::purge_empty`] reclaims abandoned
    /// channels.
    pub fn subscribe(&self, room: &str) -> broadcast::Receiver<String> {
        let mut rooms = match self.rooms.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        rooms
            .entry(room.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Drop channels whose subscribers are all gone.
    pub fn purge_empty(&self) {
        let mut rooms = match self.rooms.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let before = rooms.len();
        rooms.retain(|_, tx| tx.receiver_count() > 0);
        let purged = before - rooms.len();
        if purged > 0 {
            tracing::debug!(purged, "reclaimed empty realtime rooms");
        }
    }

    /// Number of rooms with at least one live channel.
    pub fn room_count(&self) -> usize {
        match self.rooms.read() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }
}

impl Default for RealtimeHub {
    fn default() -> Self {
        Self::new(256)
    }
}

impl Notifier for RealtimeHub {
    fn publish(&self, room: &str, event: &RealtimeEvent) {
        let payload = match serde_json::to_string(event) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(error = %e, room, "failed to serialize realtime event");
                return;
            }
        };

        let rooms = match self.rooms.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match rooms.get(room) {
            Some(tx) => {
                // Send only fails when every receiver is gone; that is the
                // same as nobody listening.
                let _ = tx.send(payload);
            }
            None => {
                tracing::trace!(room, "no subscribers, event dropped");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn typing_event() -> RealtimeEvent {
        RealtimeEvent::UserTyping {
            match_id: Uuid::nil(),
            user_id: Uuid::nil(),
        }
    }

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let hub = RealtimeHub::default();
        let mut rx = hub.subscribe("user:1");

        hub.publish("user:1", &typing_event());

        let payload = rx.recv().await.unwrap();
        assert!(payload.contains("user_typing"));
    }

    #[tokio::test]
    async fn rooms_are_isolated() {
        let hub = RealtimeHub::default();
        let mut rx_a = hub.subscribe("user:a");
        let mut rx_b = hub.subscribe("user:b");

        hub.publish("user:a", &typing_event());

        assert!(rx_a.recv().await.is_ok());
        assert!(rx_b.try_recv().is_err());
    }

    #[test]
    fn publishing_to_an_empty_room_is_a_no_op() {
        let hub = RealtimeHub::default();
        hub.publish("user:ghost", &typing_event());
        assert_eq!(hub.room_count(), 0);
    }

    #[test]
    fn purge_reclaims_abandoned_rooms() {
        let hub = RealtimeHub::default();
        let rx = hub.subscribe("chat:1");
        assert_eq!(hub.room_count(), 1);

        drop(rx);
        hub.purge_empty();
        assert_eq!(hub.room_count(), 0);
    }
}
