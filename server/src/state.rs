use std::path::Path;
use std::sync::Arc;

use crate::chat::presence::PresenceTracker;
use crate::chat::rooms::RoomRegistry;
use crate::config::{Config, Durability, RateLimitConfig};
use crate::error::StoreError;
use crate::identity::{SharedUsers, UserStore};
use crate::store::{spawn_flush_worker, MessageStore, SharedStore};
use crate::ws::{new_connection_registry, ConnectionRegistry};

/// Shared application state passed to all handlers via axum State extractor.
#[derive(Clone)]
pub struct AppState {
    /// Room -> retained messages, persisted to messages.json
    pub store: SharedStore,
    /// Accounts and tokens, persisted to users.json
    pub users: SharedUsers,
    /// Live room membership
    pub rooms: Arc<RoomRegistry>,
    pub presence: Arc<PresenceTracker>,
    /// Every live WebSocket connection
    pub connections: ConnectionRegistry,
    pub durability: Durability,
    /// Per-connection message admission limits
    pub rate_limit: RateLimitConfig,
}

impl AppState {
    /// Load both stores from the configured data directory and start the
    /// background message writer.
    pub async fn initialize(config: &Config) -> Result<Self, StoreError> {
        let data_dir = Path::new(&config.data_dir);
        let store = Arc::new(MessageStore::open(data_dir, config.retention().ttl()).await?);
        let users = Arc::new(UserStore::open(data_dir, &config.admin_emails).await?);
        spawn_flush_worker(store.clone());

        Ok(Self {
            store,
            users,
            rooms: Arc::new(RoomRegistry::new()),
            presence: Arc::new(PresenceTracker::new()),
            connections: new_connection_registry(),
            durability: config.durability,
            rate_limit: config.rate_limit(),
        })
    }
}
