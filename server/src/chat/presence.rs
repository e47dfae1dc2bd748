//! Server-side presence tracking and broadcast.
//!
//! A user is online while at least one of their connections is live. Only the
//! transitions are broadcast, and they are emitted under the tracker lock so
//! the last `presence` event seen by clients always matches the table.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::ws::broadcast::broadcast_to_all;
use crate::ws::protocol::{PresenceEvent, ServerEvent};
use crate::ws::{ConnectionId, ConnectionRegistry, ConnectionSender};

#[derive(Debug, Default)]
pub struct PresenceTracker {
    entries: Mutex<HashMap<String, HashSet<ConnectionId>>>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, HashSet<ConnectionId>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a new connection. Broadcasts `online` on the user's first one
    /// and queues the sorted `presence-list` on `tx`, both before the lock is
    /// released: no transition can reach the new connection ahead of its
    /// snapshot. Returns the ids in that snapshot.
    pub fn connect(
        &self,
        user_id: &str,
        connection_id: ConnectionId,
        tx: &ConnectionSender,
        registry: &ConnectionRegistry,
    ) -> Vec<String> {
        let mut entries = self.entries();
        let connections = entries.entry(user_id.to_string()).or_default();
        let first = connections.is_empty();
        connections.insert(connection_id);

        if first {
            tracing::info!(user_id = %user_id, "User online");
            broadcast_to_all(registry, &presence_event(user_id, true));
        }

        let mut online: Vec<String> = entries.keys().cloned().collect();
        online.sort();
        if let Some(frame) = ServerEvent::PresenceList(online.clone()).to_frame() {
            tx.send(frame);
        }
        online
    }

    /// Forget a connection. Broadcasts `offline` when it was the user's last.
    /// Returns true when the user went offline.
    pub fn disconnect(
        &self,
        user_id: &str,
        connection_id: ConnectionId,
        registry: &ConnectionRegistry,
    ) -> bool {
        let mut entries = self.entries();
        let Some(connections) = entries.get_mut(user_id) else {
            return false;
        };
        if !connections.remove(&connection_id) || !connections.is_empty() {
            return false;
        }
        entries.remove(user_id);

        tracing::info!(user_id = %user_id, "User offline");
        broadcast_to_all(registry, &presence_event(user_id, false));
        true
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        self.entries().contains_key(user_id)
    }

    pub fn connection_count(&self, user_id: &str) -> usize {
        self.entries().get(user_id).map_or(0, HashSet::len)
    }
}

fn presence_event(user_id: &str, online: bool) -> ServerEvent {
    ServerEvent::Presence(PresenceEvent {
        user_id: user_id.to_string(),
        online,
    })
}
