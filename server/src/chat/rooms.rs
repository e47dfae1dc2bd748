//! Room naming, permissions and live membership.
//!
//! Rooms are never declared: a sector room is any name other than the `dm:`
//! form, and access is derived from the caller's user snapshot each time.

use std::collections::HashSet;
use std::fmt;

use dashmap::DashMap;

use crate::error::ChatError;
use crate::identity::User;
use crate::state::AppState;
use crate::store::ChatMessage;
use crate::ws::broadcast::broadcast_to_room;
use crate::ws::protocol::{MemberEvent, ServerEvent};
use crate::ws::session::Session;
use crate::ws::ConnectionId;

const DM_PREFIX: &str = "dm:";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomName {
    Sector(String),
    /// Participant ids, sorted ascending
    Direct(String, String),
}

impl RoomName {
    pub fn parse(raw: &str) -> Result<Self, ChatError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(ChatError::InvalidRoom);
        }
        let Some(participants) = raw.strip_prefix(DM_PREFIX) else {
            return Ok(Self::Sector(raw.to_string()));
        };

        let mut ids = participants.split(':');
        match (ids.next(), ids.next(), ids.next()) {
            (Some(a), Some(b), None) if !a.is_empty() && !b.is_empty() => Ok(Self::direct(a, b)),
            _ => Err(ChatError::InvalidRoom),
        }
    }

    pub fn direct(a: &str, b: &str) -> Self {
        if a <= b {
            Self::Direct(a.to_string(), b.to_string())
        } else {
            Self::Direct(b.to_string(), a.to_string())
        }
    }

    pub fn permits(&self, user: &User) -> bool {
        if user.is_admin {
            return true;
        }
        match self {
            Self::Sector(sector) => *sector == user.sector,
            Self::Direct(a, b) => user.id == *a || user.id == *b,
        }
    }
}

impl fmt::Display for RoomName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sector(name) => f.write_str(name),
            Self::Direct(a, b) => write!(f, "{DM_PREFIX}{a}:{b}"),
        }
    }
}

/// Canonical form of a room name; unparseable names are returned as given.
pub fn canonical(raw: &str) -> String {
    RoomName::parse(raw)
        .map(|room| room.to_string())
        .unwrap_or_else(|_| raw.to_string())
}

/// Parse `raw` and check that `user` may use it.
pub fn authorize(user: &User, raw: &str) -> Result<RoomName, ChatError> {
    let room = RoomName::parse(raw)?;
    if room.permits(user) {
        Ok(room)
    } else {
        Err(ChatError::NotAllowed)
    }
}

/// Live membership: room name -> connections currently joined.
#[derive(Debug, Default)]
pub struct RoomRegistry {
    members: DashMap<String, HashSet<ConnectionId>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true when the connection was not already a member.
    pub fn join(&self, room: &str, connection_id: ConnectionId) -> bool {
        self.members
            .entry(room.to_string())
            .or_default()
            .insert(connection_id)
    }

    /// Returns true when the connection was a member. Drops the entry once
    /// the room has no members left.
    pub fn leave(&self, room: &str, connection_id: ConnectionId) -> bool {
        let removed = self
            .members
            .get_mut(room)
            .map(|mut set| set.remove(&connection_id))
            .unwrap_or(false);
        self.members.remove_if(room, |_, set| set.is_empty());
        removed
    }

    pub fn members(&self, room: &str) -> Vec<ConnectionId> {
        self.members
            .get(room)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn is_member(&self, room: &str, connection_id: ConnectionId) -> bool {
        self.members
            .get(room)
            .is_some_and(|set| set.contains(&connection_id))
    }

    pub fn room_count(&self) -> usize {
        self.members.len()
    }
}

fn member_event(user: &User) -> MemberEvent {
    MemberEvent {
        user: user.display_name().to_string(),
        user_id: user.id.clone(),
    }
}

/// Join a room and return its retained history. Other members are told
/// about the newcomer; rejoining is silent.
pub fn join_room(
    state: &AppState,
    session: &mut Session,
    raw: &str,
) -> Result<Vec<ChatMessage>, ChatError> {
    let room = authorize(&session.user, raw)?.to_string();

    // Membership is recorded under the store lock so a concurrent send is
    // either in the history or delivered live, never both or neither.
    let (history, newly_joined) = state
        .store
        .history_with(&room, || state.rooms.join(&room, session.id));
    session.joined_rooms.insert(room.clone());

    if newly_joined {
        broadcast_to_room(
            &state.connections,
            &state.rooms,
            &room,
            &ServerEvent::UserJoined(member_event(&session.user)),
            Some(session.id),
        );
        tracing::debug!(
            connection_id = %session.id,
            user_id = %session.user.id,
            room = %room,
            history = history.len(),
            "Joined room"
        );
    }
    Ok(history)
}

/// Leave a room and notify the remaining members. Leaving a room that was
/// never joined is a no-op.
pub fn leave_room(state: &AppState, session: &mut Session, raw: &str) {
    let room = canonical(raw);
    if !session.joined_rooms.remove(&room) {
        return;
    }
    if state.rooms.leave(&room, session.id) {
        broadcast_to_room(
            &state.connections,
            &state.rooms,
            &room,
            &ServerEvent::UserLeft(member_event(&session.user)),
            None,
        );
        tracing::debug!(
            connection_id = %session.id,
            user_id = %session.user.id,
            room = %room,
            "Left room"
        );
    }
}

/// Drop every membership of a closing connection without notifications.
pub fn leave_all_silently(state: &AppState, session: &mut Session) {
    for room in session.joined_rooms.drain() {
        state.rooms.leave(&room, session.id);
    }
}
