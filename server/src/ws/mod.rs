pub mod actor;
pub mod broadcast;
pub mod handler;
pub mod protocol;
pub mod session;

use axum::extract::ws::Message;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};
use uuid::Uuid;

/// Identifies one live WebSocket connection. A user may hold several.
pub type ConnectionId = Uuid;

/// Frames that may wait for a connection's writer before it is dropped as a
/// slow consumer.
pub const OUTBOUND_CAPACITY: usize = 1024;

/// Sender half of a connection's outbound queue.
///
/// The queue is bounded. A push that finds it full is discarded and raises
/// the overflow signal, which the connection actor answers by closing the
/// connection; a client that stops reading cannot grow server memory.
#[derive(Debug, Clone)]
pub struct ConnectionSender {
    tx: mpsc::Sender<Message>,
    overflow: Arc<Notify>,
}

impl ConnectionSender {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            Self {
                tx,
                overflow: Arc::new(Notify::new()),
            },
            rx,
        )
    }

    /// Queue a frame without waiting. Returns false when it was not queued.
    pub fn send(&self, frame: Message) -> bool {
        match self.tx.try_send(frame) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.overflow.notify_one();
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Resolves once a frame has been discarded because the queue was full.
    pub async fn overflowed(&self) {
        self.overflow.notified().await;
    }
}

#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub user_id: String,
    pub tx: ConnectionSender,
}

/// Connection registry: every live connection, keyed by connection id.
pub type ConnectionRegistry = Arc<DashMap<ConnectionId, ConnectionHandle>>;

/// Create a new empty connection registry.
pub fn new_connection_registry() -> ConnectionRegistry {
    Arc::new(DashMap::new())
}
