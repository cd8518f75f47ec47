//! Output transformers: pluggable adapters from raw process output to
//! semantic [`OutputEvent`]s.
//!
//! A transformer is owned by exactly one session and fed every decoded
//! chunk in arrival order. It may buffer partial records between calls;
//! [`OutputTransformer::finalize`] runs once after the process has exited
//! and both pipes are closed.

pub mod agent_json;

use serde::{Deserialize, Serialize};

use crate::models::event::{OutputEvent, StreamKind};

pub use agent_json::AgentJsonRenderer;

/// Stateful chunk-to-event adapter.
pub trait OutputTransformer: Send {
    /// Consume one chunk read from `stream`, returning zero or more events.
    fn handle_chunk(&mut self, stream: StreamKind, chunk: &str) -> Vec<OutputEvent>;

    /// Flush anything still buffered. Called exactly once, after exit.
    fn finalize(&mut self) -> Vec<OutputEvent>;
}

/// Identity transformer: every chunk becomes one event verbatim.
#[derive(Debug, Clone, Copy, Default)]
pub struct Passthrough;

impl OutputTransformer for Passthrough {
    fn handle_chunk(&mut self, stream: StreamKind, chunk: &str) -> Vec<OutputEvent> {
        if chunk.is_empty() {
            return Vec::new();
        }
        vec![stream.event(chunk)]
    }

    fn finalize(&mut self) -> Vec<OutputEvent> {
        Vec::new()
    }
}

/// Transformer selection accepted at the HTTP boundary.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    /// Pass output through unchanged.
    #[default]
    Raw,
    /// Render newline-delimited agent JSON events as Markdown.
    AgentJson,
}

impl OutputFormat {
    /// Build a fresh transformer instance for one session.
    #[must_use]
    pub fn transformer(self) -> Box<dyn OutputTransformer> {
        match self {
            Self::Raw => Box::new(Passthrough),
            Self::AgentJson => Box::new(AgentJsonRenderer::new()),
        }
    }
}
