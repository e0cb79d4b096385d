//! Ephemeral routing table mapping live connections to room memberships.
//!
//! Nothing here is authoritative: every entry can be rebuilt from the store when clients
//! reconnect after a restart.

use dashmap::DashMap;
use indexmap::IndexMap;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use crate::dto::ws::ServerMessage;

/// Identifier assigned to each live connection.
pub type ConnectionId = Uuid;

/// Membership a connection acts on behalf of once it joined a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub room_code: String,
    pub identity: String,
    pub player_id: Uuid,
    pub display_name: String,
    pub is_host: bool,
}

struct ConnectionHandle {
    tx: mpsc::UnboundedSender<ServerMessage>,
    attachment: Option<Attachment>,
}

/// Registry of live connections and the room broadcast groups they belong to.
#[derive(Default)]
pub struct SessionRegistry {
    connections: DashMap<ConnectionId, ConnectionHandle>,
    rooms: DashMap<String, IndexMap<ConnectionId, mpsc::UnboundedSender<ServerMessage>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a new, not yet attached, connection.
    pub fn register(&self, tx: mpsc::UnboundedSender<ServerMessage>) -> ConnectionId {
        let id = Uuid::new_v4();
        self.connections.insert(
            id,
            ConnectionHandle {
                tx,
                attachment: None,
            },
        );
        id
    }

    /// Forget a connection, returning the membership it was attached to.
    pub fn unregister(&self, id: ConnectionId) -> Option<Attachment> {
        let (_, handle) = self.connections.remove(&id)?;
        let attachment = handle.attachment?;
        self.leave_group(&attachment.room_code, id);
        Some(attachment)
    }

    /// Number of live connections, attached or not.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn attachment(&self, id: ConnectionId) -> Option<Attachment> {
        self.connections
            .get(&id)
            .and_then(|handle| handle.attachment.clone())
    }

    /// Bind the connection to a membership and add it to the room's broadcast group.
    ///
    /// `first` is queued while the group is locked, so it reaches the connection before any
    /// room broadcast emitted after the connection became a member. Returns the previous
    /// attachment when the connection switched rooms or memberships.
    pub fn attach(
        &self,
        id: ConnectionId,
        attachment: Attachment,
        first: ServerMessage,
    ) -> Option<Attachment> {
        let (tx, previous) = {
            let mut handle = self.connections.get_mut(&id)?;
            let previous = handle.attachment.replace(attachment.clone());
            (handle.tx.clone(), previous)
        };

        if let Some(previous) = &previous {
            if previous.room_code != attachment.room_code {
                self.leave_group(&previous.room_code, id);
            }
        }

        let mut group = self.rooms.entry(attachment.room_code.clone()).or_default();
        let _ = tx.send(first);
        group.insert(id, tx);
        debug!(
            connection = %id,
            room = %attachment.room_code,
            identity = %attachment.identity,
            "connection attached"
        );

        previous
    }

    /// Remove a connection from its room without closing it.
    pub fn detach(&self, id: ConnectionId) -> Option<Attachment> {
        let attachment = self.connections.get_mut(&id)?.attachment.take()?;
        self.leave_group(&attachment.room_code, id);
        Some(attachment)
    }

    /// Detach every connection of `identity` in `room_code`.
    pub fn detach_identity(&self, room_code: &str, identity: &str) -> Vec<ConnectionId> {
        let ids: Vec<ConnectionId> = self
            .connections
            .iter()
            .filter(|entry| {
                entry.attachment.as_ref().is_some_and(|attachment| {
                    attachment.room_code == room_code && attachment.identity == identity
                })
            })
            .map(|entry| *entry.key())
            .collect();

        for id in &ids {
            self.detach(*id);
        }
        ids
    }

    /// Drop the room's broadcast group and clear the attachment of every member connection.
    pub fn close_room(&self, room_code: &str) -> Vec<ConnectionId> {
        let Some((_, group)) = self.rooms.remove(room_code) else {
            return Vec::new();
        };

        let ids: Vec<ConnectionId> = group.keys().copied().collect();
        for id in &ids {
            if let Some(mut handle) = self.connections.get_mut(id) {
                handle.attachment = None;
            }
        }
        ids
    }

    /// Queue a message for one connection. Returns `false` when the connection is gone.
    pub fn send_to(&self, id: ConnectionId, message: ServerMessage) -> bool {
        let Some(tx) = self.connections.get(&id).map(|handle| handle.tx.clone()) else {
            return false;
        };
        tx.send(message).is_ok()
    }

    /// Queue a message for every connection in the room. Returns the number of recipients.
    pub fn broadcast_room(&self, room_code: &str, message: ServerMessage) -> usize {
        self.broadcast_filtered(room_code, None, message)
    }

    /// Queue a message for every connection in the room except `except`.
    pub fn broadcast_except(
        &self,
        room_code: &str,
        except: ConnectionId,
        message: ServerMessage,
    ) -> usize {
        self.broadcast_filtered(room_code, Some(except), message)
    }

    /// Connections currently in the room's broadcast group, in attach order.
    pub fn room_connections(&self, room_code: &str) -> Vec<ConnectionId> {
        self.rooms
            .get(room_code)
            .map(|group| group.keys().copied().collect())
            .unwrap_or_default()
    }

    fn broadcast_filtered(
        &self,
        room_code: &str,
        except: Option<ConnectionId>,
        message: ServerMessage,
    ) -> usize {
        // Exclusive access keeps emission order identical for every member.
        let Some(mut group) = self.rooms.get_mut(room_code) else {
            return 0;
        };

        let mut delivered = 0;
        group.retain(|id, tx| {
            if Some(*id) == except {
                return true;
            }
            let alive = tx.send(message.clone()).is_ok();
            if alive {
                delivered += 1;
            }
            alive
        });
        delivered
    }

    fn leave_group(&self, room_code: &str, id: ConnectionId) {
        let now_empty = match self.rooms.get_mut(room_code) {
            Some(mut group) => {
                group.shift_remove(&id);
                group.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.rooms.remove_if(room_code, |_, group| group.is_empty());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attachment(room: &str, identity: &str) -> Attachment {
        Attachment {
            room_code: room.into(),
            identity: identity.into(),
            player_id: Uuid::new_v4(),
            display_name: identity.to_uppercase(),
            is_host: false,
        }
    }

    fn closed(reason: &str) -> ServerMessage {
        ServerMessage::RoomClosed {
            reason: reason.into(),
        }
    }

    #[test]
    fn first_message_precedes_later_broadcasts() {
        let registry = SessionRegistry::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = registry.register(tx);

        registry.attach(id, attachment("ABCD", "p1"), closed("first"));
        registry.broadcast_room("ABCD", closed("second"));

        assert_eq!(rx.try_recv().unwrap(), closed("first"));
        assert_eq!(rx.try_recv().unwrap(), closed("second"));
    }

    #[test]
    fn broadcast_except_skips_sender() {
        let registry = SessionRegistry::new();
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        let a = registry.register(tx_a);
        let b = registry.register(tx_b);
        registry.attach(a, attachment("ABCD", "a"), closed("hello a"));
        registry.attach(b, attachment("ABCD", "b"), closed("hello b"));
        rx_a.try_recv().unwrap();
        rx_b.try_recv().unwrap();

        assert_eq!(registry.broadcast_except("ABCD", b, closed("news")), 1);
        assert_eq!(rx_a.try_recv().unwrap(), closed("news"));
        assert!(rx_b.try_recv().is_err());
    }

    #[test]
    fn switching_rooms_leaves_previous_group() {
        let registry = SessionRegistry::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let id = registry.register(tx);
        registry.attach(id, attachment("ABCD", "p"), closed("x"));
        let previous = registry.attach(id, attachment("WXYZ", "p"), closed("y"));

        assert_eq!(previous.unwrap().room_code, "ABCD");
        assert!(registry.room_connections("ABCD").is_empty());
        assert_eq!(registry.room_connections("WXYZ"), vec![id]);
    }

    #[test]
    fn unregister_returns_attachment_and_drops_dead_senders() {
        let registry = SessionRegistry::new();
        let (tx, rx) = mpsc::unbounded_channel();
        let id = registry.register(tx);
        registry.attach(id, attachment("ABCD", "p"), closed("x"));
        drop(rx);

        assert_eq!(registry.broadcast_room("ABCD", closed("gone")), 0);
        assert!(registry.room_connections("ABCD").is_empty());
        assert_eq!(registry.unregister(id).unwrap().identity, "p");
        assert!(!registry.send_to(id, closed("late")));
    }

    #[test]
    fn close_room_clears_attachments() {
        let registry = SessionRegistry::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let id = registry.register(tx);
        registry.attach(id, attachment("ABCD", "p"), closed("x"));

        assert_eq!(registry.close_room("ABCD"), vec![id]);
        assert!(registry.attachment(id).is_none());
        assert!(registry.send_to(id, closed("still open")));
    }
}
