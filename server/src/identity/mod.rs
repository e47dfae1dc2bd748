//! Minimal identity provider: registration, login and bearer-token lookup
//! backed by `{data_dir}/users.json`.

pub mod middleware;
pub mod routes;
pub mod store;
pub mod tokens;

use serde::{Deserialize, Serialize};

use crate::error::StoreError;
pub use middleware::AuthUser;
pub use store::{SharedUsers, UserStore};

/// Authenticated user snapshot. Taken once per connection and not refreshed
/// until the client reconnects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    pub sector: String,
    #[serde(rename = "admin", alias = "isAdmin")]
    pub is_admin: bool,
}

impl User {
    /// Name shown to other room members; falls back to the email.
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.email
        } else {
            &self.name
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("name, email, sector and password are required")]
    MissingFields,
    #[error("sector must be a plain room name")]
    InvalidSector,
    #[error("email already registered")]
    EmailTaken,
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("credential hashing failed: {0}")]
    Hash(String),
    #[error("user store failure: {0}")]
    Store(#[from] StoreError),
}
