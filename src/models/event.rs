//! Output events recorded in a session's event log.

use serde::{Deserialize, Serialize};

/// Which pipe of the child process a chunk was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    /// Standard output.
    Stdout,
    /// Standard error.
    Stderr,
}

impl StreamKind {
    /// Wrap `text` in the event variant matching this stream.
    #[must_use]
    pub fn event(self, text: impl Into<String>) -> OutputEvent {
        match self {
            Self::Stdout => OutputEvent::Stdout { text: text.into() },
            Self::Stderr => OutputEvent::Stderr { text: text.into() },
        }
    }
}

/// One entry in a session's append-only event log.
///
/// Serialized as an internally tagged JSON object, e.g.
/// `{"type":"stdout","text":"hello\n"}` or
/// `{"type":"exit","message":"Process exited","code":0}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputEvent {
    /// Text written to standard output (or rendered by a transformer).
    Stdout {
        /// Output text.
        text: String,
    },
    /// Text written to standard error, or a runner diagnostic.
    Stderr {
        /// Output text.
        text: String,
    },
    /// The process exited; always the last event in the log.
    Exit {
        /// Human-readable exit reason.
        message: String,
        /// Exit code; absent when the process was killed by a signal.
        code: Option<i32>,
    },
    /// The process could not be started or waited on; always the last event.
    Error {
        /// Failure description.
        message: String,
    },
}

impl OutputEvent {
    /// Shorthand for a `stdout` event.
    #[must_use]
    pub fn stdout(text: impl Into<String>) -> Self {
        Self::Stdout { text: text.into() }
    }

    /// Shorthand for a `stderr` event.
    #[must_use]
    pub fn stderr(text: impl Into<String>) -> Self {
        Self::Stderr { text: text.into() }
    }

    /// Whether this event ends the log (`exit` or `error`).
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Exit { .. } | Self::Error { .. })
    }
}
