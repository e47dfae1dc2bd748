//! Batch transfer: export a room's retained messages and import candidate
//! messages produced by an export (or any compatible tool).

use std::collections::HashSet;

use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use super::{now_millis, Author, ChatMessage, MessageStore};
use crate::chat::sanitize::sanitize_text;

/// Per-batch import outcome.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub added: usize,
    /// Entries that were not JSON objects
    pub invalid: usize,
    /// Ids already present in the room (or earlier in the batch)
    pub duplicates: usize,
    /// Entries older than the retention window
    pub expired: usize,
}

impl ImportReport {
    pub fn skipped(&self) -> usize {
        self.invalid + self.duplicates + self.expired
    }
}

impl MessageStore {
    /// Retained messages of `room` with `timestamp >= since`, newest last.
    pub fn export(&self, room: &str, since: i64) -> Vec<ChatMessage> {
        let mut messages: Vec<ChatMessage> = self
            .history(room)
            .into_iter()
            .filter(|m| m.timestamp >= since)
            .collect();
        messages.sort_by_key(|m| m.timestamp);
        messages
    }

    pub fn import(&self, room: &str, candidates: &[Value]) -> ImportReport {
        self.import_at(room, candidates, now_millis())
    }

    /// Append well-formed, unseen, non-expired candidates to `room`.
    pub fn import_at(&self, room: &str, candidates: &[Value], now: i64) -> ImportReport {
        let mut report = ImportReport::default();
        let mut rooms = self.rooms();
        let list = rooms.entry(room.to_string()).or_default();
        let mut seen: HashSet<String> = list.iter().map(|m| m.id.clone()).collect();

        for candidate in candidates {
            let Some(message) = candidate_message(room, candidate, now) else {
                report.invalid += 1;
                continue;
            };
            if seen.contains(&message.id) {
                report.duplicates += 1;
                continue;
            }
            if now - message.timestamp > self.ttl_ms {
                report.expired += 1;
                continue;
            }
            seen.insert(message.id.clone());
            list.push(message);
            report.added += 1;
        }

        if list.is_empty() {
            rooms.remove(room);
        }
        report
    }
}

/// Normalize one message record, from an import batch or a stored document.
/// `None` when it is not a JSON object.
pub(super) fn candidate_message(room: &str, candidate: &Value, now: i64) -> Option<ChatMessage> {
    let object = candidate.as_object()?;

    let id = object
        .get("id")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::now_v7().to_string());

    let author_value = object.get("author").or_else(|| object.get("user"));
    let field = |key: &str| {
        author_value
            .and_then(|a| a.get(key))
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };
    let email = field("email");
    let author = Author {
        id: field("id").unwrap_or_default(),
        name: field("name")
            .or_else(|| email.clone())
            .unwrap_or_else(|| "Unknown".to_string()),
        email,
        is_admin: author_value
            .and_then(|a| a.get("isAdmin").or_else(|| a.get("admin")))
            .and_then(Value::as_bool)
            .unwrap_or(false),
    };

    let text = sanitize_text(object.get("text").and_then(Value::as_str).unwrap_or(""));

    let timestamp = object
        .get("timestamp")
        .or_else(|| object.get("ts"))
        .and_then(|ts| ts.as_i64().or_else(|| ts.as_f64().map(|f| f as i64)))
        .unwrap_or(now);

    Some(ChatMessage {
        id,
        room: room.to_string(),
        author,
        text,
        timestamp,
    })
}
