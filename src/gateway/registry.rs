//! Live connections grouped by room.

use super::frames::OutboundFrame;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::mpsc;

pub type ConnectionId = u64;

/// Handle to one open connection. Frames sent here are written to the
/// socket, in order, by the connection's writer task.
#[derive(Debug, Clone)]
pub struct Connection {
    pub id: ConnectionId,
    pub room: String,
    pub user_id: String,
    tx: mpsc::UnboundedSender<OutboundFrame>,
}

impl Connection {
    pub fn new(
        id: ConnectionId,
        room: &str,
        user_id: &str,
    ) -> (Self, mpsc::UnboundedReceiver<OutboundFrame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                id,
                room: room.to_string(),
                user_id: user_id.to_string(),
                tx,
            },
            rx,
        )
    }

    /// Queues a frame. Returns `false` once the writer side has gone away.
    pub fn send(&self, frame: OutboundFrame) -> bool {
        self.tx.send(frame).is_ok()
    }
}

/// A room key exists only while the room has at least one connection.
#[derive(Debug, Default)]
pub struct RoomRegistry {
    rooms: HashMap<String, BTreeMap<ConnectionId, Connection>>,
}

impl RoomRegistry {
    /// Returns `true` when this is the room's first connection.
    pub fn insert(&mut self, connection: Connection) -> bool {
        let room = self.rooms.entry(connection.room.clone()).or_default();
        let first = room.is_empty();
        room.insert(connection.id, connection);
        first
    }

    /// Returns `Some(room_now_empty)` if the connection was registered.
    pub fn remove(&mut self, room: &str, id: ConnectionId) -> Option<bool> {
        let connections = self.rooms.get_mut(room)?;
        connections.remove(&id)?;
        let now_empty = connections.is_empty();
        if now_empty {
            self.rooms.remove(room);
        }
        Some(now_empty)
    }

    /// Sends `frame` to every connection in the room except `exclude`.
    /// Returns the number of connections the frame was queued for.
    pub fn broadcast(&self, room: &str, frame: &OutboundFrame, exclude: Option<ConnectionId>) -> usize {
        let Some(connections) = self.rooms.get(room) else {
            return 0;
        };
        connections
            .values()
            .filter(|connection| Some(connection.id) != exclude)
            .filter(|connection| connection.send(frame.clone()))
            .count()
    }

    pub fn connection_count(&self, room: &str) -> usize {
        self.rooms.get(room).map_or(0, BTreeMap::len)
    }

    pub fn contains_room(&self, room: &str) -> bool {
        self.rooms.contains_key(room)
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_remove_track_room_lifetime() {
        let mut registry = RoomRegistry::default();
        let (a, _rx_a) = Connection::new(1, "r", "alice");
        let (b, _rx_b) = Connection::new(2, "r", "bob");

        assert!(registry.insert(a));
        assert!(!registry.insert(b));
        assert_eq!(registry.connection_count("r"), 2);

        assert_eq!(registry.remove("r", 1), Some(false));
        assert_eq!(registry.remove("r", 1), None);
        assert_eq!(registry.remove("r", 2), Some(true));
        assert!(!registry.contains_room("r"));
        assert_eq!(registry.room_count(), 0);
    }

    #[test]
    fn test_broadcast_excludes_sender_and_other_rooms() {
        let mut registry = RoomRegistry::default();
        let (a, mut rx_a) = Connection::new(1, "r", "alice");
        let (b, mut rx_b) = Connection::new(2, "r", "bob");
        let (c, mut rx_c) = Connection::new(3, "other", "carol");
        registry.insert(a);
        registry.insert(b);
        registry.insert(c);

        let sent = registry.broadcast("r", &OutboundFrame::system("hi"), Some(1));
        assert_eq!(sent, 1);
        assert!(rx_a.try_recv().is_err());
        assert!(matches!(rx_b.try_recv(), Ok(OutboundFrame::System { .. })));
        assert!(rx_c.try_recv().is_err());
    }

    #[test]
    fn test_broadcast_skips_closed_connections() {
        let mut registry = RoomRegistry::default();
        let (a, rx_a) = Connection::new(1, "r", "alice");
        registry.insert(a);
        drop(rx_a);
        assert_eq!(registry.broadcast("r", &OutboundFrame::system("hi"), None), 0);
    }
}
