use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use serde::{Deserialize, Serialize};

use super::{AuthUser, User};
use crate::error::{ApiError, ChatError};
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct RegisterRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub sector: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub ok: bool,
    pub user: User,
    pub token: String,
}

/// POST /api/register
pub async fn register(
    State(state): State<AppState>,
    body: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<Json<SessionResponse>, ApiError> {
    let Json(req) = body.map_err(reject_body)?;
    let (user, token) = state
        .users
        .register(&req.name, &req.email, &req.sector, &req.password)
        .await?;
    Ok(Json(SessionResponse {
        ok: true,
        user,
        token,
    }))
}

/// POST /api/login
/// Issues a new token; the previous one stops working.
pub async fn login(
    State(state): State<AppState>,
    body: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<SessionResponse>, ApiError> {
    let Json(req) = body.map_err(reject_body)?;
    let (user, token) = state.users.login(&req.email, &req.password).await?;
    Ok(Json(SessionResponse {
        ok: true,
        user,
        token,
    }))
}

/// Non-JSON bodies get the same `{ok:false,msg}` shape as every other error.
fn reject_body(rejection: JsonRejection) -> ApiError {
    tracing::debug!(error = %rejection.body_text(), "Rejected request body");
    ChatError::InvalidPayload.into()
}

/// GET /api/users
pub async fn list_users(State(state): State<AppState>, _caller: AuthUser) -> Json<Vec<User>> {
    Json(state.users.list_users())
}
