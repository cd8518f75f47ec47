//! Command session runner.
//!
//! Spawns shell commands, buffers their output per session, multiplexes
//! it to any number of subscribers, and stops commands on request with a
//! graceful-then-forceful escalation. [`SessionRunner`] is the façade the
//! HTTP layer talks to.

pub mod cleanup;
mod launcher;
pub mod publisher;
pub mod registry;
pub mod session;
pub mod signal;
mod termination;

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::config::GlobalConfig;
use crate::models::session::{SessionSummary, StopOutcome};
use crate::transform::{OutputFormat, OutputTransformer};
use crate::{AppError, Result};

use launcher::LaunchContext;
use termination::TerminationContext;

pub use publisher::{FrameStream, StreamFrame, Subscription};
pub use registry::SessionRegistry;
pub use session::Session;
pub use signal::{SignalTarget, StopSignal};

/// Floor for the subscriber heartbeat period; a zero period cannot tick.
const MIN_HEARTBEAT: Duration = Duration::from_millis(1);

/// What a run request asks for: a new command or an existing session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunTarget {
    /// Start `command`, rendering output with `output`.
    New {
        /// Shell command text.
        command: String,
        /// Transformer selection.
        output: OutputFormat,
    },
    /// Reattach to a session by token.
    Existing(String),
}

impl RunTarget {
    /// Validate the raw request fields; exactly one of `command` or
    /// `session_id` must be present and non-blank.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Validation` if both or neither are supplied, or
    /// the supplied value is blank.
    pub fn from_parts(
        command: Option<String>,
        session_id: Option<String>,
        output: OutputFormat,
    ) -> Result<Self> {
        match (command, session_id) {
            (Some(_), Some(_)) => Err(AppError::Validation(
                "supply either command or session_id, not both".into(),
            )),
            (None, None) => Err(AppError::Validation(
                "command or session_id is required".into(),
            )),
            (Some(command), None) => {
                if command.trim().is_empty() {
                    Err(AppError::Validation("command must not be blank".into()))
                } else {
                    Ok(Self::New { command, output })
                }
            }
            (None, Some(session_id)) => {
                if session_id.trim().is_empty() {
                    Err(AppError::Validation("session_id must not be blank".into()))
                } else {
                    Ok(Self::Existing(session_id))
                }
            }
        }
    }
}

/// Owns the session registry and exposes run, attach, stop, and list.
///
/// Cheap to clone; clones share the same registry.
#[derive(Debug, Clone)]
pub struct SessionRunner {
    launch: LaunchContext,
    termination: TerminationContext,
    heartbeat_interval: Duration,
}

impl SessionRunner {
    /// Build a runner with its own empty registry and the platform's
    /// signal strategy.
    #[must_use]
    pub fn new(config: &GlobalConfig) -> Self {
        Self::with_signal_target(
            config,
            signal::platform_target(config.runner.process_groups),
        )
    }

    /// Build a runner that stops commands through `signals`.
    #[must_use]
    pub fn with_signal_target(config: &GlobalConfig, signals: Arc<dyn SignalTarget>) -> Self {
        let registry = Arc::new(SessionRegistry::new());
        Self {
            launch: LaunchContext {
                registry: Arc::clone(&registry),
                shell: config.shell.clone(),
                project_root: config.project_root.clone(),
                process_groups: config.runner.process_groups,
                cleanup_delay: config.runner.cleanup_delay(),
            },
            termination: TerminationContext {
                registry,
                signals,
                force_kill_delay: config.runner.force_kill_delay(),
            },
            heartbeat_interval: config.runner.heartbeat_interval().max(MIN_HEARTBEAT),
        }
    }

    /// The registry backing this runner.
    #[must_use]
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.launch.registry
    }

    /// Spawn `command` as a new session.
    ///
    /// Must be called from within a Tokio runtime. A command that fails to
    /// spawn still yields a (completed) session carrying an `error` event.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Validation` if `command` is blank.
    pub fn start(
        &self,
        command: &str,
        transformer: Option<Box<dyn OutputTransformer>>,
    ) -> Result<Arc<Session>> {
        if command.trim().is_empty() {
            return Err(AppError::Validation("command must not be blank".into()));
        }
        let transformer = transformer.unwrap_or_else(|| OutputFormat::Raw.transformer());
        Ok(launcher::launch(&self.launch, command, transformer))
    }

    /// Attach a subscriber to an existing session.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if no session has that token.
    pub fn attach(&self, session_id: &str) -> Result<Subscription> {
        let session = self
            .get(session_id)
            .ok_or_else(|| AppError::NotFound(format!("session {session_id}")))?;
        Ok(Subscription::attach(session, self.heartbeat_interval))
    }

    /// Start or reattach, then subscribe.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Validation` for a blank command, or
    /// `AppError::NotFound` for an unknown session token.
    pub fn run(&self, target: RunTarget) -> Result<Subscription> {
        match target {
            RunTarget::New { command, output } => {
                let session = self.start(&command, Some(output.transformer()))?;
                Ok(Subscription::attach(session, self.heartbeat_interval))
            }
            RunTarget::Existing(session_id) => {
                info!(session_id = %session_id, "reattaching to session");
                self.attach(&session_id)
            }
        }
    }

    /// Ask a session to stop: `SIGINT`, then `SIGTERM`, then `SIGKILL`
    /// once the force-kill delay passes.
    #[must_use]
    pub fn stop(&self, session_id: &str) -> StopOutcome {
        termination::stop(&self.termination, session_id)
    }

    /// `SIGKILL` the process group of every session still running.
    ///
    /// Called on server shutdown so no command outlives the server.
    /// Returns how many sessions were signalled.
    #[must_use]
    pub fn kill_all(&self) -> usize {
        termination::kill_all(&self.termination)
    }

    /// Summaries of every registered session, newest first.
    #[must_use]
    pub fn list(&self) -> Vec<SessionSummary> {
        self.launch.registry.list()
    }

    /// Look up a session by token.
    #[must_use]
    pub fn get(&self, session_id: &str) -> Option<Arc<Session>> {
        self.launch.registry.get(session_id)
    }
}
