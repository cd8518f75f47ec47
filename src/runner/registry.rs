//! In-memory table of live and recently finished sessions.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;

use super::session::Session;
use crate::models::session::SessionSummary;

/// Mapping from session token to [`Session`]; the single source of truth
/// for what is running.
///
/// Each runner owns its own registry so independent instances (and
/// tests) never share state.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, Arc<Session>>>,
}

impl SessionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a newly created session.
    pub fn insert(&self, session: Arc<Session>) {
        let id = session.id().to_owned();
        self.lock().insert(id, session);
    }

    /// Look up a session by token.
    #[must_use]
    pub fn get(&self, session_id: &str) -> Option<Arc<Session>> {
        self.lock().get(session_id).cloned()
    }

    /// Remove a session. Only the cleanup scheduler calls this.
    pub fn evict(&self, session_id: &str) -> Option<Arc<Session>> {
        let removed = self.lock().remove(session_id);
        if removed.is_some() {
            debug!(session_id, "session evicted from registry");
        }
        removed
    }

    /// Every registered session, in no particular order.
    #[must_use]
    pub fn sessions(&self) -> Vec<Arc<Session>> {
        self.lock().values().cloned().collect()
    }

    /// Summaries of every registered session, newest first.
    #[must_use]
    pub fn list(&self) -> Vec<SessionSummary> {
        let sessions = self.sessions();
        let mut summaries: Vec<SessionSummary> = sessions.iter().map(|s| s.summary()).collect();
        summaries.sort_by(|a, b| {
            b.start_time
                .cmp(&a.start_time)
                .then_with(|| a.id.cmp(&b.id))
        });
        summaries
    }

    /// Number of registered sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no sessions are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<Session>>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
