//! JSON wire protocol.
//!
//! Client frames: `{"event": "join" | "message" | "leave", "requestId": .., "data": {..}}`.
//! Every client frame is answered with exactly one `ack` event carrying the
//! same `requestId`. Server-initiated frames use the same `{event, data}` shape.

use axum::extract::ws::Message;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

use crate::chat::{dispatcher, rooms};
use crate::error::ChatError;
use crate::state::AppState;
use crate::store::ChatMessage;
use crate::ws::session::Session;

#[derive(Debug, Deserialize)]
pub struct ClientEnvelope {
    pub event: String,
    /// Opaque correlation id, echoed on the ack
    #[serde(default, rename = "requestId")]
    pub request_id: Option<Value>,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Default, Deserialize)]
pub struct JoinRequest {
    #[serde(default)]
    pub room: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct SendRequest {
    #[serde(default)]
    pub room: String,
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct LeaveRequest {
    #[serde(default)]
    pub room: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    Message(ChatMessage),
    UserJoined(MemberEvent),
    UserLeft(MemberEvent),
    Presence(PresenceEvent),
    PresenceList(Vec<String>),
    Error(ErrorEvent),
    Ack(Ack),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberEvent {
    pub user: String,
    pub user_id: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceEvent {
    pub user_id: String,
    pub online: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorEvent {
    pub msg: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Ack {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<Value>,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub messages: Option<Vec<ChatMessage>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<ChatMessage>,
}

impl Ack {
    pub fn ok(request_id: Option<Value>) -> Self {
        Self {
            request_id,
            ok: true,
            msg: None,
            messages: None,
            message: None,
        }
    }

    pub fn failed(request_id: Option<Value>, err: ChatError) -> Self {
        Self {
            ok: false,
            msg: Some(err.to_string()),
            ..Self::ok(request_id)
        }
    }
}

impl ServerEvent {
    /// Encode as a text frame. `None` only if serialization fails.
    pub fn to_frame(&self) -> Option<Message> {
        match serde_json::to_string(self) {
            Ok(json) => Some(Message::Text(json.into())),
            Err(e) => {
                tracing::error!(error = %e, "Failed to encode server event");
                None
            }
        }
    }
}

fn parse_data<T: DeserializeOwned>(data: Value) -> Result<T, ChatError> {
    let data = if data.is_null() {
        Value::Object(Default::default())
    } else {
        data
    };
    serde_json::from_value(data).map_err(|_| ChatError::InvalidPayload)
}

/// Decode one text frame from the client and answer it with an ack.
pub async fn handle_text_message(text: &str, session: &mut Session, state: &AppState) {
    let envelope: ClientEnvelope = match serde_json::from_str(text) {
        Ok(envelope) => envelope,
        Err(e) => {
            tracing::debug!(connection_id = %session.id, error = %e, "Malformed client frame");
            session.send(&ServerEvent::Error(ErrorEvent {
                msg: ChatError::InvalidPayload.to_string(),
            }));
            return;
        }
    };

    let request_id = envelope.request_id;
    let ack = match envelope.event.as_str() {
        "join" => {
            match parse_data::<JoinRequest>(envelope.data)
                .and_then(|req| rooms::join_room(state, session, &req.room))
            {
                Ok(history) => Ack {
                    messages: Some(history),
                    ..Ack::ok(request_id)
                },
                Err(err) => Ack::failed(request_id, err),
            }
        }
        "message" => match parse_data::<SendRequest>(envelope.data) {
            Ok(req) => match dispatcher::send(state, session, &req.room, &req.text).await {
                Ok(message) => Ack {
                    message: Some(message),
                    ..Ack::ok(request_id)
                },
                Err(err) => Ack::failed(request_id, err),
            },
            Err(err) => Ack::failed(request_id, err),
        },
        "leave" => {
            if let Ok(req) = parse_data::<LeaveRequest>(envelope.data) {
                rooms::leave_room(state, session, &req.room);
            }
            Ack::ok(request_id)
        }
        other => {
            tracing::debug!(connection_id = %session.id, event = %other, "Unknown client event");
            Ack::failed(request_id, ChatError::InvalidPayload)
        }
    };

    if !ack.ok {
        tracing::debug!(
            connection_id = %session.id,
            user_id = %session.user.id,
            msg = ack.msg.as_deref().unwrap_or_default(),
            "Request rejected"
        );
    }
    session.send(&ServerEvent::Ack(ack));
}
