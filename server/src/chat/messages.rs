//! REST endpoints over room history.
//!
//! Reads are public. Import is an authenticated write: the caller must be
//! allowed in the room under the same rules as a WebSocket join.

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::header,
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::rooms::{authorize, canonical};
use crate::error::ApiError;
use crate::identity::AuthUser;
use crate::state::AppState;
use crate::store::{ChatMessage, ImportReport};

#[derive(Debug, Default, Deserialize)]
pub struct ExportQuery {
    /// Epoch millis; anything non-numeric means "from the beginning"
    #[serde(default)]
    pub since: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ImportResponse {
    pub ok: bool,
    pub skipped: usize,
    #[serde(flatten)]
    pub report: ImportReport,
}

/// GET /rooms/{room}/messages
pub async fn get_room_messages(
    State(state): State<AppState>,
    Path(room): Path<String>,
) -> Json<Vec<ChatMessage>> {
    Json(state.store.history(&canonical(&room)))
}

/// GET /rooms/{room}/export?since=<ms>
/// Same messages as the history endpoint, served as a file download.
pub async fn export_room(
    State(state): State<AppState>,
    Path(room): Path<String>,
    Query(query): Query<ExportQuery>,
) -> impl IntoResponse {
    let room = canonical(&room);
    let since = query
        .since
        .as_deref()
        .and_then(|s| s.trim().parse::<f64>().ok())
        .filter(|s| s.is_finite())
        .map_or(0, |s| s as i64);

    let messages = state.store.export(&room, since);
    let disposition = format!(
        "attachment; filename=\"messages-{}-{}.json\"",
        filename_safe(&room),
        Utc::now().format("%Y-%m-%d")
    );
    tracing::debug!(room = %room, since, count = messages.len(), "Room exported");

    ([(header::CONTENT_DISPOSITION, disposition)], Json(messages))
}

/// POST /rooms/{room}/import
/// Body: JSON array of messages, typically a previous export.
pub async fn import_room(
    State(state): State<AppState>,
    Path(room): Path<String>,
    AuthUser(user): AuthUser,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<ImportResponse>, ApiError> {
    let room = authorize(&user, &room)?.to_string();

    let candidates = match body {
        Ok(Json(Value::Array(candidates))) => candidates,
        _ => return Err(ApiError::bad_request("expected array of messages")),
    };

    let report = state.store.import(&room, &candidates);
    if report.added > 0 {
        state.store.persist(state.durability).await;
    }

    tracing::info!(
        user_id = %user.id,
        room = %room,
        added = report.added,
        invalid = report.invalid,
        duplicates = report.duplicates,
        expired = report.expired,
        "Messages imported"
    );

    Ok(Json(ImportResponse {
        ok: true,
        skipped: report.skipped(),
        report,
    }))
}

fn filename_safe(room: &str) -> String {
    room.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':') {
                c
            } else {
                '_'
            }
        })
        .collect()
}
