/// Persisted record types. These serialize 1:1 into messages.json and are
/// the same objects broadcast over the WebSocket and served by the export
/// endpoint.
use serde::{Deserialize, Serialize};

use crate::identity::User;

/// A chat message. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    /// Filled from the map key when loading documents that omit it.
    #[serde(default)]
    pub room: String,
    #[serde(alias = "user")]
    pub author: Author,
    pub text: String,
    /// Epoch milliseconds
    #[serde(alias = "ts")]
    pub timestamp: i64,
}

/// Author snapshot embedded in each message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Author {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default, alias = "admin")]
    pub is_admin: bool,
}

impl From<&User> for Author {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            name: user.name.clone(),
            email: Some(user.email.clone()),
            is_admin: user.is_admin,
        }
    }
}

/// Room name -> ordered message list, the whole messages.json document.
pub type RoomMessages = std::collections::BTreeMap<String, Vec<ChatMessage>>;
