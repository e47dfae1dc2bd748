//! Background retention pass for expired messages.
//!
//! Independent of send-triggered writes: every `interval` the TTL filter is
//! re-applied across all rooms and the result is persisted.

use std::time::Duration;

use super::{now_millis, SharedStore};

/// Run one retention pass: evict, then persist. Returns messages evicted.
pub async fn run_cleanup_pass(store: &SharedStore) -> usize {
    let evicted = store.cleanup_at(now_millis());

    if evicted > 0 {
        tracing::info!("Message retention cleanup: evicted {} expired messages", evicted);
    } else {
        tracing::debug!("Message retention cleanup: no expired messages");
    }

    if let Err(e) = store.flush().await {
        tracing::error!("Message retention persist error: {}", e);
    }
    evicted
}

/// Spawn a background task that periodically evicts expired messages.
pub fn spawn_retention_cleanup(store: SharedStore, interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;
            run_cleanup_pass(&store).await;
        }
    })
}
