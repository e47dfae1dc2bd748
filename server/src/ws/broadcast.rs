use super::protocol::ServerEvent;
use super::{ConnectionId, ConnectionRegistry};
use crate::chat::rooms::RoomRegistry;

/// Broadcast an event to every live connection.
pub fn broadcast_to_all(registry: &ConnectionRegistry, event: &ServerEvent) {
    let Some(frame) = event.to_frame() else {
        return;
    };
    for entry in registry.iter() {
        entry.value().tx.send(frame.clone());
    }
}

/// Send an event to every member of `room`, optionally skipping one connection.
pub fn broadcast_to_room(
    registry: &ConnectionRegistry,
    rooms: &RoomRegistry,
    room: &str,
    event: &ServerEvent,
    except: Option<ConnectionId>,
) {
    let members = rooms.members(room);
    if members.is_empty() {
        return;
    }
    let Some(frame) = event.to_frame() else {
        return;
    };
    for connection_id in members {
        if Some(connection_id) == except {
            continue;
        }
        if let Some(handle) = registry.get(&connection_id) {
            handle.tx.send(frame.clone());
        }
    }
}
