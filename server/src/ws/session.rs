use std::collections::HashSet;

use uuid::Uuid;

use super::protocol::ServerEvent;
use super::{ConnectionHandle, ConnectionId, ConnectionSender};
use crate::chat::rate_limit::SlidingWindowLimiter;
use crate::chat::rooms;
use crate::identity::User;
use crate::state::AppState;

/// State tied to one authenticated connection. Dropped on disconnect.
pub struct Session {
    pub id: ConnectionId,
    /// Snapshot taken at handshake
    pub user: User,
    pub joined_rooms: HashSet<String>,
    pub limiter: SlidingWindowLimiter,
    tx: ConnectionSender,
}

impl Session {
    /// Register a freshly authenticated connection, mark its user online and
    /// send it the `presence-list` snapshot.
    pub fn open(state: &AppState, user: User, tx: ConnectionSender) -> Self {
        let session = Self {
            id: Uuid::now_v7(),
            limiter: SlidingWindowLimiter::from_config(&state.rate_limit),
            joined_rooms: HashSet::new(),
            user,
            tx,
        };

        state.connections.insert(
            session.id,
            ConnectionHandle {
                user_id: session.user.id.clone(),
                tx: session.tx.clone(),
            },
        );

        state.presence.connect(
            &session.user.id,
            session.id,
            &session.tx,
            &state.connections,
        );

        tracing::debug!(
            connection_id = %session.id,
            user_id = %session.user.id,
            connections = state.connections.len(),
            "Connection registered"
        );
        session
    }

    /// Queue an event for this connection only.
    pub fn send(&self, event: &ServerEvent) {
        if let Some(frame) = event.to_frame() {
            self.tx.send(frame);
        }
    }

    /// Release everything tied to the connection. Rooms are left without
    /// `user-left` notifications.
    pub fn close(mut self, state: &AppState) {
        rooms::leave_all_silently(state, &mut self);
        state.connections.remove(&self.id);
        state
            .presence
            .disconnect(&self.user.id, self.id, &state.connections);

        tracing::debug!(
            connection_id = %self.id,
            user_id = %self.user.id,
            "Connection unregistered"
        );
    }
}
