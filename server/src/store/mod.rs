//! Durable room -> message list store.
//!
//! The whole mapping lives in memory behind one mutex and is written to
//! `{data_dir}/messages.json` as a whole-document overwrite (temp file +
//! rename). Writes requested while a flush is in progress coalesce into a
//! single follow-up flush; the snapshot is always taken under the write
//! lock, so the newest state is what lands on disk last.

pub mod models;
pub mod retention;
pub mod transfer;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::Notify;

use crate::config::Durability;
use crate::error::StoreError;
pub use models::{Author, ChatMessage, RoomMessages};
pub use transfer::ImportReport;

const MESSAGES_FILE: &str = "messages.json";

pub type SharedStore = Arc<MessageStore>;

pub struct MessageStore {
    rooms: Mutex<RoomMessages>,
    path: PathBuf,
    ttl_ms: i64,
    write_lock: tokio::sync::Mutex<()>,
    dirty: Notify,
}

/// Current wall-clock time in epoch milliseconds.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

impl MessageStore {
    /// Load `messages.json` from `data_dir`, dropping expired messages and
    /// rooms left empty. A missing file yields an empty store.
    ///
    /// Entries are normalised one by one, so a malformed message is skipped
    /// rather than failing the load. A document that cannot be read or parsed
    /// is logged, moved aside when possible, and the store starts empty.
    pub async fn open(data_dir: impl AsRef<Path>, ttl: Duration) -> Result<Self, StoreError> {
        let path = data_dir.as_ref().join(MESSAGES_FILE);
        let ttl_ms = ttl.as_millis() as i64;
        let now = now_millis();

        let mut rooms = match tokio::fs::read(&path).await {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => RoomMessages::new(),
            Ok(bytes) => match serde_json::from_slice::<BTreeMap<String, Value>>(&bytes) {
                Ok(document) => normalize_document(document, now),
                Err(e) => {
                    tracing::error!(path = %path.display(), error = %e, "Message store document is malformed");
                    set_aside(&path).await;
                    RoomMessages::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => RoomMessages::new(),
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "Failed to read message store");
                RoomMessages::new()
            }
        };
        let dropped = retain_fresh(&mut rooms, now, ttl_ms);

        tracing::info!(
            path = %path.display(),
            rooms = rooms.len(),
            expired = dropped,
            "Message store loaded"
        );

        Ok(Self {
            rooms: Mutex::new(rooms),
            path,
            ttl_ms,
            write_lock: tokio::sync::Mutex::new(()),
            dirty: Notify::new(),
        })
    }

    fn rooms(&self) -> MutexGuard<'_, RoomMessages> {
        self.rooms.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn ttl_ms(&self) -> i64 {
        self.ttl_ms
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn is_fresh(&self, message: &ChatMessage, now: i64) -> bool {
        now - message.timestamp <= self.ttl_ms
    }

    /// Retained (non-expired) history of a room, in stored order.
    pub fn history(&self, room: &str) -> Vec<ChatMessage> {
        self.history_at(room, now_millis())
    }

    pub fn history_at(&self, room: &str, now: i64) -> Vec<ChatMessage> {
        self.fresh_history(&self.rooms(), room, now)
    }

    fn fresh_history(&self, rooms: &RoomMessages, room: &str, now: i64) -> Vec<ChatMessage> {
        rooms
            .get(room)
            .map(|messages| {
                messages
                    .iter()
                    .filter(|m| self.is_fresh(m, now))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Retained history of `room` read together with `then`, both under the
    /// store lock: no append can land between the read and `then`.
    pub fn history_with<R>(&self, room: &str, then: impl FnOnce() -> R) -> (Vec<ChatMessage>, R) {
        let rooms = self.rooms();
        let history = self.fresh_history(&rooms, room, now_millis());
        (history, then())
    }

    /// Append a message to its room. `on_append` runs while the store lock is
    /// held, so fan-out performed there is ordered identically for every
    /// member of the room.
    pub fn append(&self, message: ChatMessage, on_append: impl FnOnce(&ChatMessage)) {
        let mut rooms = self.rooms();
        let list = rooms.entry(message.room.clone()).or_default();
        list.push(message);
        if let Some(stored) = list.last() {
            on_append(stored);
        }
    }

    /// Evict expired messages and empty rooms. Returns the number evicted.
    pub fn cleanup_at(&self, now: i64) -> usize {
        retain_fresh(&mut self.rooms(), now, self.ttl_ms)
    }

    pub fn room_names(&self) -> Vec<String> {
        self.rooms().keys().cloned().collect()
    }

    /// Serialize the full mapping and overwrite `messages.json`.
    pub async fn flush(&self) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let document = serde_json::to_vec_pretty(&*self.rooms())?;
        write_document(&self.path, &document).await?;

        tracing::debug!(
            path = %self.path.display(),
            bytes = document.len(),
            "Message store flushed"
        );
        Ok(())
    }

    /// Ask the background writer for a flush.
    pub fn mark_dirty(&self) {
        self.dirty.notify_one();
    }

    /// Persist after a mutation according to the durability mode. Failures
    /// are logged, never propagated: the in-memory state stays authoritative.
    pub async fn persist(&self, durability: Durability) {
        match durability {
            Durability::Async => self.mark_dirty(),
            Durability::Sync => {
                if let Err(e) = self.flush().await {
                    tracing::error!(error = %e, "Failed to persist message store");
                }
            }
        }
    }
}

/// Overwrite `path` with `document` through a sibling temp file, so readers
/// never observe a partially written document.
pub(crate) async fn write_document(path: &Path, document: &[u8]) -> Result<(), StoreError> {
    if let Some(dir) = path.parent() {
        tokio::fs::create_dir_all(dir).await?;
    }
    let tmp_path = path.with_extension("json.tmp");
    tokio::fs::write(&tmp_path, document).await?;
    tokio::fs::rename(&tmp_path, path).await?;
    Ok(())
}

/// Build the room map from a parsed document, skipping rooms that are not
/// lists and entries that are not objects.
fn normalize_document(document: BTreeMap<String, Value>, now: i64) -> RoomMessages {
    let mut rooms = RoomMessages::new();
    let mut skipped = 0;
    for (room, entries) in document {
        let Value::Array(entries) = entries else {
            tracing::warn!(room = %room, "Skipping room whose messages are not a list");
            continue;
        };
        let mut messages = Vec::with_capacity(entries.len());
        for entry in &entries {
            match transfer::candidate_message(&room, entry, now) {
                Some(message) => messages.push(message),
                None => skipped += 1,
            }
        }
        rooms.insert(room, messages);
    }
    if skipped > 0 {
        tracing::warn!(skipped, "Skipped malformed stored messages");
    }
    rooms
}

/// Rename an unreadable document to `<name>.corrupt-<millis>` so the next
/// flush does not destroy it.
async fn set_aside(path: &Path) {
    let backup = path.with_extension(format!("json.corrupt-{}", now_millis()));
    match tokio::fs::rename(path, &backup).await {
        Ok(()) => tracing::warn!(backup = %backup.display(), "Malformed message store moved aside"),
        Err(e) => tracing::error!(error = %e, "Failed to move malformed message store aside"),
    }
}

/// Drop expired messages and rooms left empty. Returns messages dropped.
fn retain_fresh(rooms: &mut RoomMessages, now: i64, ttl_ms: i64) -> usize {
    let mut dropped = 0;
    for messages in rooms.values_mut() {
        let before = messages.len();
        messages.retain(|m| now - m.timestamp <= ttl_ms);
        dropped += before - messages.len();
    }
    rooms.retain(|_, messages| !messages.is_empty());
    dropped
}

/// Spawn the background writer that services `mark_dirty` requests.
pub fn spawn_flush_worker(store: SharedStore) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            store.dirty.notified().await;
            if let Err(e) = store.flush().await {
                tracing::error!(error = %e, "Failed to persist message store");
            }
        }
    })
}
