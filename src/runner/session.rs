//! Per-session state guarded by a single lock.
//!
//! Child I/O, the stop escalation timer, and every attached subscriber
//! touch the same [`Session`] concurrently. All mutable fields live in
//! one [`SessionState`] behind a `std::sync::Mutex` that is never held
//! across an `.await`. Every mutation bumps a `watch` counter so
//! subscribers wake up without polling.

use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::warn;
use uuid::Uuid;

use crate::models::event::OutputEvent;
use crate::models::session::SessionSummary;

#[derive(Debug, Default)]
struct SessionState {
    events: Vec<OutputEvent>,
    is_complete: bool,
    exit_code: Option<i32>,
    stop_requested: bool,
    force_kill: Option<JoinHandle<()>>,
    pid: Option<u32>,
}

/// Outcome of flagging a session for stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StopRequest {
    /// The session already finished; nothing to signal.
    AlreadyComplete {
        /// Recorded exit code.
        exit_code: Option<i32>,
    },
    /// The stop flag is set and the process is still running.
    Accepted {
        /// OS process id of the shell, if known.
        pid: Option<u32>,
        /// `true` when the flag was already set by an earlier request.
        repeated: bool,
    },
}

/// The record of one spawned command's lifecycle and buffered output.
#[derive(Debug)]
pub struct Session {
    id: String,
    command: String,
    start_time: DateTime<Utc>,
    state: Mutex<SessionState>,
    changes: watch::Sender<u64>,
}

impl Session {
    /// Create a session with a fresh random token and an empty log.
    ///
    /// The token comes from a v4 UUID (OS randomness) because it doubles
    /// as the credential for reattaching to the output stream.
    #[must_use]
    pub fn new(command: impl Into<String>) -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            id: Uuid::new_v4().to_string(),
            command: command.into(),
            start_time: Utc::now(),
            state: Mutex::new(SessionState::default()),
            changes,
        }
    }

    /// Opaque session token.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Original shell command text.
    #[must_use]
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Creation timestamp.
    #[must_use]
    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    /// Whether the process has exited or failed to start.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.lock().is_complete
    }

    /// Exit code recorded at completion.
    #[must_use]
    pub fn exit_code(&self) -> Option<i32> {
        self.lock().exit_code
    }

    /// Whether a stop has been requested.
    #[must_use]
    pub fn stop_requested(&self) -> bool {
        self.lock().stop_requested
    }

    /// OS process id of the spawned shell.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.lock().pid
    }

    /// Whether a force-kill timer has been armed for this session.
    #[must_use]
    pub fn force_kill_armed(&self) -> bool {
        self.lock().force_kill.is_some()
    }

    /// Snapshot of the full event log.
    #[must_use]
    pub fn events(&self) -> Vec<OutputEvent> {
        self.lock().events.clone()
    }

    /// Events appended at or after `cursor`, plus the completion flag read
    /// under the same lock.
    ///
    /// When the flag is `true` the returned batch already contains the
    /// terminal event, so a reader that sees it can stop.
    #[must_use]
    pub fn events_since(&self, cursor: usize) -> (Vec<OutputEvent>, bool) {
        let state = self.lock();
        let batch = state.events.get(cursor..).map(<[_]>::to_vec).unwrap_or_default();
        (batch, state.is_complete)
    }

    /// Dashboard view of this session.
    #[must_use]
    pub fn summary(&self) -> SessionSummary {
        let state = self.lock();
        SessionSummary {
            id: self.id.clone(),
            command: self.command.clone(),
            start_time: self.start_time,
            is_complete: state.is_complete,
            exit_code: state.exit_code,
            stop_requested: state.stop_requested,
        }
    }

    /// Receiver that changes whenever the log or completion state changes.
    #[must_use]
    pub fn subscribe_changes(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }

    /// Append a non-terminal event.
    ///
    /// Returns `false` (and drops the event) once the session is complete
    /// or when `event` is itself terminal; terminal events go through
    /// [`Session::complete`].
    pub(crate) fn append(&self, event: OutputEvent) -> bool {
        if event.is_terminal() {
            warn!(session_id = %self.id, "refusing terminal event outside completion");
            return false;
        }
        {
            let mut state = self.lock();
            if state.is_complete {
                return false;
            }
            state.events.push(event);
        }
        self.notify();
        true
    }

    /// Append the terminal event and mark the session complete.
    ///
    /// `terminal` receives the stop flag so the exit message can reflect a
    /// user-initiated stop observed under the same lock. Any pending
    /// force-kill timer is cancelled. Returns `false` if the session was
    /// already complete.
    pub(crate) fn complete(
        &self,
        exit_code: Option<i32>,
        terminal: impl FnOnce(bool) -> OutputEvent,
    ) -> bool {
        {
            let mut state = self.lock();
            if state.is_complete {
                return false;
            }
            let event = terminal(state.stop_requested);
            debug_assert!(event.is_terminal());
            state.events.push(event);
            state.is_complete = true;
            state.exit_code = exit_code;
            if let Some(timer) = state.force_kill.take() {
                timer.abort();
            }
        }
        self.notify();
        true
    }

    pub(crate) fn set_pid(&self, pid: Option<u32>) {
        self.lock().pid = pid;
    }

    /// Set the stop flag unless the session already finished.
    pub(crate) fn request_stop(&self) -> StopRequest {
        let mut state = self.lock();
        if state.is_complete {
            return StopRequest::AlreadyComplete {
                exit_code: state.exit_code,
            };
        }
        let repeated = state.stop_requested;
        state.stop_requested = true;
        let pid = state.pid;
        drop(state);
        self.notify();
        StopRequest::Accepted { pid, repeated }
    }

    /// Arm the force-kill timer built by `spawn_timer`, at most once.
    ///
    /// Returns `false` without calling `spawn_timer` when a timer is
    /// already armed or the session is complete.
    pub(crate) fn arm_force_kill(&self, spawn_timer: impl FnOnce() -> JoinHandle<()>) -> bool {
        let mut state = self.lock();
        if state.is_complete || state.force_kill.is_some() {
            return false;
        }
        state.force_kill = Some(spawn_timer());
        true
    }

    fn notify(&self) {
        self.changes.send_modify(|version| *version = version.wrapping_add(1));
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
