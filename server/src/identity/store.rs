use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{tokens, IdentityError, User};
use crate::chat::rooms::RoomName;
use crate::error::StoreError;
use crate::store::write_document;

const USERS_FILE: &str = "users.json";

pub type SharedUsers = Arc<UserStore>;

/// One entry of users.json. Only the hash of the current token is kept.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserRecord {
    id: String,
    name: String,
    email: String,
    sector: String,
    password_hash: String,
    #[serde(default)]
    admin: bool,
    #[serde(default)]
    token_hash: Option<String>,
    #[serde(default)]
    created_at: Option<String>,
}

impl UserRecord {
    fn snapshot(&self) -> User {
        User {
            id: self.id.clone(),
            name: self.name.clone(),
            email: self.email.clone(),
            sector: self.sector.clone(),
            is_admin: self.admin,
        }
    }
}

#[derive(Default)]
struct Directory {
    records: Vec<UserRecord>,
    /// token hash -> index into `records`
    by_token: HashMap<String, usize>,
}

impl Directory {
    fn new(records: Vec<UserRecord>) -> Self {
        let by_token = records
            .iter()
            .enumerate()
            .filter_map(|(i, r)| r.token_hash.clone().map(|h| (h, i)))
            .collect();
        Self { records, by_token }
    }

    fn position_by_email(&self, email: &str) -> Option<usize> {
        self.records.iter().position(|r| r.email == email)
    }

    /// Replace the record's token with a fresh one. Returns the raw token.
    fn rotate_token(&mut self, index: usize) -> String {
        let (token, hash) = tokens::issue_token();
        if let Some(old) = self.records[index].token_hash.replace(hash.clone()) {
            self.by_token.remove(&old);
        }
        self.by_token.insert(hash, index);
        token
    }
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub struct UserStore {
    directory: Mutex<Directory>,
    path: PathBuf,
    admin_emails: HashSet<String>,
    write_lock: tokio::sync::Mutex<()>,
}

impl UserStore {
    /// Load `users.json` from `data_dir` and rebuild the token index.
    pub async fn open(
        data_dir: impl AsRef<Path>,
        admin_emails: &[String],
    ) -> Result<Self, StoreError> {
        let path = data_dir.as_ref().join(USERS_FILE);
        let records: Vec<UserRecord> = match tokio::fs::read(&path).await {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Vec::new(),
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };

        tracing::info!(path = %path.display(), users = records.len(), "User store loaded");

        Ok(Self {
            directory: Mutex::new(Directory::new(records)),
            path,
            admin_emails: admin_emails.iter().map(|e| normalize_email(e)).collect(),
            write_lock: tokio::sync::Mutex::new(()),
        })
    }

    fn directory(&self) -> MutexGuard<'_, Directory> {
        self.directory.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create an account and issue its first token.
    pub async fn register(
        &self,
        name: &str,
        email: &str,
        sector: &str,
        password: &str,
    ) -> Result<(User, String), IdentityError> {
        let name = name.trim();
        let sector = sector.trim();
        let email = normalize_email(email);
        if name.is_empty() || email.is_empty() || sector.is_empty() || password.is_empty() {
            return Err(IdentityError::MissingFields);
        }
        // The sector doubles as the user's room name, so it must not read as a DM room
        if !matches!(RoomName::parse(sector), Ok(RoomName::Sector(ref name)) if name == sector) {
            return Err(IdentityError::InvalidSector);
        }
        if self.directory().position_by_email(&email).is_some() {
            return Err(IdentityError::EmailTaken);
        }

        let password = password.to_string();
        let password_hash = tokio::task::spawn_blocking(move || tokens::hash_password(&password))
            .await
            .map_err(StoreError::from)??;

        let (user, token) = {
            let mut directory = self.directory();
            // Re-check: another registration may have won while hashing.
            if directory.position_by_email(&email).is_some() {
                return Err(IdentityError::EmailTaken);
            }
            directory.records.push(UserRecord {
                id: Uuid::now_v7().to_string(),
                name: name.to_string(),
                admin: self.admin_emails.contains(&email),
                email,
                sector: sector.to_string(),
                password_hash,
                token_hash: None,
                created_at: Some(Utc::now().to_rfc3339()),
            });
            let index = directory.records.len() - 1;
            let token = directory.rotate_token(index);
            (directory.records[index].snapshot(), token)
        };

        tracing::info!(user_id = %user.id, sector = %user.sector, admin = user.is_admin, "User registered");
        self.persist().await;
        Ok((user, token))
    }

    /// Verify credentials and rotate the user's token. The previous token
    /// stops authenticating immediately.
    pub async fn login(&self, email: &str, password: &str) -> Result<(User, String), IdentityError> {
        let email = normalize_email(email);
        let (user_id, stored_hash) = {
            let directory = self.directory();
            let index = directory
                .position_by_email(&email)
                .ok_or(IdentityError::InvalidCredentials)?;
            let record = &directory.records[index];
            (record.id.clone(), record.password_hash.clone())
        };

        let password = password.to_string();
        let verified =
            tokio::task::spawn_blocking(move || tokens::verify_password(&password, &stored_hash))
                .await
                .map_err(StoreError::from)?;
        if !verified {
            tracing::debug!(user_id = %user_id, "Login rejected");
            return Err(IdentityError::InvalidCredentials);
        }

        let (user, token) = {
            let mut directory = self.directory();
            let index = directory
                .records
                .iter()
                .position(|r| r.id == user_id)
                .ok_or(IdentityError::InvalidCredentials)?;
            let token = directory.rotate_token(index);
            (directory.records[index].snapshot(), token)
        };

        tracing::info!(user_id = %user.id, "User logged in");
        self.persist().await;
        Ok((user, token))
    }

    /// Resolve a raw bearer token to its user.
    pub fn authenticate(&self, token: &str) -> Option<User> {
        let hash = tokens::hash_token(token);
        let directory = self.directory();
        directory
            .by_token
            .get(&hash)
            .map(|&index| directory.records[index].snapshot())
    }

    pub fn list_users(&self) -> Vec<User> {
        self.directory()
            .records
            .iter()
            .map(UserRecord::snapshot)
            .collect()
    }

    async fn save(&self) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let document = serde_json::to_vec_pretty(&self.directory().records)?;
        write_document(&self.path, &document).await
    }

    async fn persist(&self) {
        if let Err(e) = self.save().await {
            tracing::error!(error = %e, path = %self.path.display(), "Failed to persist user store");
        }
    }
}
