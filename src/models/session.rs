//! Serializable views of session state returned across the HTTP boundary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Point-in-time status of one session, used by dashboards that poll
/// instead of holding a stream open per session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SessionSummary {
    /// Opaque session token.
    pub id: String,
    /// Original shell command text.
    pub command: String,
    /// When the session was created.
    pub start_time: DateTime<Utc>,
    /// Whether the process has exited (or failed to start).
    pub is_complete: bool,
    /// Exit code, present only once complete and only for normal exits.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    /// Whether a stop has been requested.
    pub stop_requested: bool,
}

/// Result of a stop request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StopOutcome {
    /// No session with that id is registered.
    NotFound,
    /// The session had already finished.
    AlreadyComplete {
        /// Recorded exit code, if any.
        exit_code: Option<i32>,
    },
    /// A graceful signal was dispatched and force-kill escalation is armed.
    Stopping,
}
