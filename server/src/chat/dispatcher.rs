use uuid::Uuid;

use super::rooms::authorize;
use super::sanitize::sanitize_text;
use crate::error::ChatError;
use crate::state::AppState;
use crate::store::{now_millis, Author, ChatMessage};
use crate::ws::broadcast::broadcast_to_room;
use crate::ws::protocol::ServerEvent;
use crate::ws::session::Session;

/// Validate, admit, store and fan out one chat message.
///
/// Joining the room first is not required, but only connections that are
/// members when the message is appended receive it live.
pub async fn send(
    state: &AppState,
    session: &mut Session,
    room: &str,
    text: &str,
) -> Result<ChatMessage, ChatError> {
    if room.is_empty() || text.is_empty() {
        return Err(ChatError::InvalidPayload);
    }
    let room = authorize(&session.user, room)?;
    if !session.limiter.try_acquire() {
        return Err(ChatError::RateLimited);
    }

    let message = ChatMessage {
        id: Uuid::now_v7().to_string(),
        room: room.to_string(),
        author: Author::from(&session.user),
        text: sanitize_text(text),
        timestamp: now_millis(),
    };

    state.store.append(message.clone(), |stored| {
        broadcast_to_room(
            &state.connections,
            &state.rooms,
            &stored.room,
            &ServerEvent::Message(stored.clone()),
            None,
        );
    });
    state.store.persist(state.durability).await;

    tracing::debug!(
        connection_id = %session.id,
        user_id = %session.user.id,
        room = %message.room,
        message_id = %message.id,
        "Message sent"
    );
    Ok(message)
}
