use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocketUpgrade},
        Query, State,
    },
    http::HeaderMap,
    response::Response,
};
use serde::Deserialize;

use super::protocol::{ErrorEvent, ServerEvent};
use crate::error::ChatError;
use crate::identity::middleware::bearer_token;
use crate::state::AppState;
use crate::ws::actor;

/// Query parameters for WebSocket connection.
#[derive(Debug, Default, Deserialize)]
pub struct WsAuthQuery {
    #[serde(default)]
    pub token: Option<String>,
}

/// Close code sent when the handshake token is missing or unknown.
pub const CLOSE_UNAUTHENTICATED: u16 = 4002;

/// GET /ws?token=...
/// WebSocket upgrade endpoint. The token comes from the query string or an
/// `Authorization: Bearer` header. On auth failure, upgrades, reports the
/// error and closes with 4002. On success, spawns an actor for the connection.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    Query(params): Query<WsAuthQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let token = params
        .token
        .as_deref()
        .filter(|t| !t.is_empty())
        .or_else(|| bearer_token(&headers));

    match token.and_then(|t| state.users.authenticate(t)) {
        Some(user) => {
            tracing::info!(
                user_id = %user.id,
                "WebSocket connection authenticated"
            );
            ws.on_upgrade(move |socket| actor::run_connection(socket, state, user))
        }
        None => {
            tracing::warn!(
                close_code = CLOSE_UNAUTHENTICATED,
                token_present = token.is_some(),
                "WebSocket auth failed"
            );

            // Upgrade the connection, then immediately close with the error code
            ws.on_upgrade(move |mut socket| async move {
                let error = ServerEvent::Error(ErrorEvent {
                    msg: ChatError::Unauthenticated.to_string(),
                });
                if let Some(frame) = error.to_frame() {
                    let _ = socket.send(frame).await;
                }
                let close_frame = CloseFrame {
                    code: CLOSE_UNAUTHENTICATED,
                    reason: "Token invalid".into(),
                };
                let _ = socket.send(Message::Close(Some(close_frame))).await;
            })
        }
    }
}
