//! Connection registry and per-identity rooms.
//!
//! Every WebSocket gets a [`ConnectionId`] and an outbound channel. Once a
//! connection announces who it is, it joins the room keyed by that
//! identity's normalized email, so events can be addressed to participants
//! instead of being fanned out to everyone.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use tandem_shared::normalize_email;
use tandem_shared::protocol::ServerEvent;
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

pub type ConnectionId = Uuid;
pub type EventSender = mpsc::UnboundedSender<ServerEvent>;

/// Identity bound to a connection by its first `user-online`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundIdentity {
    pub email: String,
    pub name: String,
}

struct Connection {
    tx: EventSender,
    identity: Option<BoundIdentity>,
}

#[derive(Clone, Default)]
pub struct Hub {
    connections: Arc<DashMap<ConnectionId, Connection>>,
    rooms: Arc<DashMap<String, HashSet<ConnectionId>>>,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new socket. Events for it arrive on the returned receiver.
    pub fn connect(&self) -> (ConnectionId, mpsc::UnboundedReceiver<ServerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        self.connections.insert(id, Connection { tx, identity: None });
        debug!(conn = %id, total = self.connections.len(), "Connection opened");
        (id, rx)
    }

    /// Associate `conn` with an identity and join that identity's room.
    ///
    /// Returns `true` when this made the identity reachable, i.e. it had no
    /// other live connection. Rebinding to a different identity leaves the
    /// old room first.
    pub fn bind(&self, conn: ConnectionId, email: &str, name: &str) -> bool {
        let key = normalize_email(email);
        let previous = {
            let Some(mut entry) = self.connections.get_mut(&conn) else {
                return false;
            };
            if entry.identity.as_ref().is_some_and(|i| i.email == key) {
                return false;
            }
            entry.identity.replace(BoundIdentity {
                email: key.clone(),
                name: name.trim().to_string(),
            })
        };

        if let Some(old) = previous {
            self.leave_room(&old.email, conn);
        }

        let mut room = self.rooms.entry(key.clone()).or_default();
        let first = room.is_empty();
        room.insert(conn);
        info!(conn = %conn, email = %key, connections = room.len(), "Identity bound");
        first
    }

    pub fn identity(&self, conn: ConnectionId) -> Option<BoundIdentity> {
        self.connections
            .get(&conn)
            .and_then(|c| c.identity.clone())
    }

    /// Forget the identity bound to `conn`, keeping the socket registered.
    /// Returns the identity and whether it was its last connection.
    pub fn unbind(&self, conn: ConnectionId) -> Option<(BoundIdentity, bool)> {
        let identity = self.connections.get_mut(&conn)?.identity.take()?;
        let last = self.leave_room(&identity.email, conn);
        Some((identity, last))
    }

    /// Drop `conn` entirely. Returns the identity it carried, if any, and
    /// whether that was the identity's last connection.
    pub fn disconnect(&self, conn: ConnectionId) -> Option<(BoundIdentity, bool)> {
        let (_, connection) = self.connections.remove(&conn)?;
        debug!(conn = %conn, total = self.connections.len(), "Connection closed");
        let identity = connection.identity?;
        let last = self.leave_room(&identity.email, conn);
        Some((identity, last))
    }

    /// Remove `conn` from a room, deleting the room once empty. Returns
    /// `true` when the room is now gone.
    fn leave_room(&self, key: &str, conn: ConnectionId) -> bool {
        if let Some(mut room) = self.rooms.get_mut(key) {
            room.remove(&conn);
        }
        self.rooms.remove_if(key, |_, room| room.is_empty()).is_some()
            || !self.rooms.contains_key(key)
    }

    pub fn is_online(&self, email: &str) -> bool {
        self.rooms
            .get(&normalize_email(email))
            .is_some_and(|room| !room.is_empty())
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Send to one connection. Returns `false` if it is gone.
    pub fn send_to(&self, conn: ConnectionId, event: ServerEvent) -> bool {
        match self.connections.get(&conn) {
            Some(c) => c.tx.send(event).is_ok(),
            None => false,
        }
    }

    /// Send to every connection in the rooms of `identities`, each
    /// connection at most once, optionally skipping one. Returns the number
    /// of connections reached.
    pub fn send_to_identities(
        &self,
        identities: &[&str],
        event: &ServerEvent,
        except: Option<ConnectionId>,
    ) -> usize {
        let mut targets = HashSet::new();
        for identity in identities {
            if let Some(room) = self.rooms.get(&normalize_email(identity)) {
                targets.extend(room.iter().copied());
            }
        }
        if let Some(skip) = except {
            targets.remove(&skip);
        }
        self.deliver(targets, event)
    }

    /// Send to every registered connection except `except`.
    pub fn broadcast(&self, event: &ServerEvent, except: Option<ConnectionId>) -> usize {
        let targets: HashSet<ConnectionId> = self
            .connections
            .iter()
            .map(|c| *c.key())
            .filter(|id| Some(*id) != except)
            .collect();
        self.deliver(targets, event)
    }

    fn deliver(&self, targets: HashSet<ConnectionId>, event: &ServerEvent) -> usize {
        targets
            .into_iter()
            .filter(|id| self.send_to(*id, event.clone()))
            .count()
    }
}
