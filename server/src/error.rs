//! Error taxonomy shared by the WebSocket protocol and the HTTP surface.
//!
//! Request-level failures are recoverable: they travel back on the request's
//! own acknowledgement (WS) or response (HTTP) and never cross connections.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::identity::IdentityError;

/// Failures surfaced to a connected client. `Display` is the ack `msg`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ChatError {
    #[error("unauthenticated")]
    Unauthenticated,
    #[error("not allowed")]
    NotAllowed,
    #[error("invalid payload")]
    InvalidPayload,
    #[error("invalid room")]
    InvalidRoom,
    #[error("rate limit")]
    RateLimited,
}

impl ChatError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthenticated => StatusCode::UNAUTHORIZED,
            Self::NotAllowed => StatusCode::FORBIDDEN,
            Self::InvalidPayload | Self::InvalidRoom => StatusCode::BAD_REQUEST,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        }
    }
}

/// Durable storage failures. Logged by callers; in-memory state stays
/// authoritative until the next restart.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed document: {0}")]
    Json(#[from] serde_json::Error),
    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// HTTP error body: `{ "ok": false, "msg": "..." }`.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub msg: String,
}

impl ApiError {
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            msg: msg.into(),
        }
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "ok": false, "msg": self.msg }))).into_response()
    }
}

impl From<ChatError> for ApiError {
    fn from(err: ChatError) -> Self {
        Self::new(err.status(), err.to_string())
    }
}

impl From<IdentityError> for ApiError {
    fn from(err: IdentityError) -> Self {
        let status = match &err {
            IdentityError::MissingFields | IdentityError::InvalidSector => StatusCode::BAD_REQUEST,
            IdentityError::EmailTaken => StatusCode::CONFLICT,
            IdentityError::InvalidCredentials => StatusCode::BAD_REQUEST,
            IdentityError::Hash(_) | IdentityError::Store(_) => {
                tracing::error!(error = %err, "Identity provider failure");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self::new(status, err.to_string())
    }
}
