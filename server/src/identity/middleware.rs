use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};

use super::{SharedUsers, User};
use crate::error::{ApiError, ChatError};
use crate::state::AppState;

/// Bearer token from an `Authorization: Bearer <token>` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Makes the user store reachable from the `AuthUser` extractor.
pub async fn inject_users(State(state): State<AppState>, mut request: Request, next: Next) -> Response {
    request.extensions_mut().insert(state.users.clone());
    next.run(request).await
}

/// The user behind the request's bearer token. Rejects with 401.
#[derive(Debug, Clone)]
pub struct AuthUser(pub User);

impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers).ok_or(ChatError::Unauthenticated)?;

        // Set by the inject_users middleware layer
        let users = parts.extensions.get::<SharedUsers>().ok_or_else(|| {
            ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "identity provider unavailable")
        })?;

        users
            .authenticate(token)
            .map(AuthUser)
            .ok_or_else(|| ChatError::Unauthenticated.into())
    }
}
