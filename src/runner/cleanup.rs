//! Delayed eviction of completed sessions.
//!
//! A finished session stays reachable for reattach and listing until the
//! grace period elapses, then it is dropped from the registry.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::info;

use super::registry::SessionRegistry;

/// Spawn a task that evicts `session_id` from `registry` after `delay`.
#[must_use]
pub fn schedule_eviction(
    registry: Arc<SessionRegistry>,
    session_id: String,
    delay: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        if registry.evict(&session_id).is_some() {
            info!(session_id = %session_id, "completed session expired");
        }
    })
}
