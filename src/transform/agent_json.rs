//! Renderer for newline-delimited agent JSON transcripts.
//!
//! Coding-agent CLIs in streaming-JSON mode print one JSON object per
//! line describing each turn: session init, assistant text, tool
//! invocations, tool results, and a final result record. This
//! transformer turns those records into readable Markdown `stdout`
//! events. stderr is passed through untouched.
//!
//! | `type`      | Rendered as                                   |
//! |-------------|-----------------------------------------------|
//! | `system`    | italic "session started" line (init only)     |
//! | `assistant` | text blocks verbatim, tool calls as one-liners |
//! | `user`      | tool results in a fenced block, truncated     |
//! | `result`    | horizontal rule plus turn/duration/cost line  |
//! | *(other)*   | skipped                                       |
//!
//! Lines that are not valid JSON are skipped; they never end the stream.

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::OutputTransformer;
use crate::models::event::{OutputEvent, StreamKind};

/// Maximum characters shown for a tool-call argument summary.
const MAX_SUMMARY_CHARS: usize = 120;

/// Maximum lines shown for a tool result.
const MAX_RESULT_LINES: usize = 20;

/// Maximum characters shown for a tool result.
const MAX_RESULT_CHARS: usize = 2_000;

/// Input keys that best describe a tool call, in preference order.
const SUMMARY_KEYS: &[&str] = &[
    "command",
    "file_path",
    "path",
    "pattern",
    "url",
    "query",
    "description",
];

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AgentMessage {
    System {
        subtype: Option<String>,
        model: Option<String>,
    },
    Assistant {
        message: MessageBody,
    },
    User {
        message: MessageBody,
    },
    Result(ResultRecord),
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
struct MessageBody {
    #[serde(default)]
    content: Value,
}

impl MessageBody {
    /// Content blocks, skipping any block whose shape is not understood.
    fn blocks(self) -> Vec<ContentBlock> {
        match self.content {
            Value::Array(items) => items
                .into_iter()
                .filter_map(|item| serde_json::from_value(item).ok())
                .collect(),
            Value::String(text) => vec![ContentBlock::Text { text }],
            _ => Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        name: String,
        #[serde(default)]
        input: Value,
    },
    ToolResult {
        #[serde(default)]
        content: Value,
        #[serde(default)]
        is_error: bool,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
struct ResultRecord {
    subtype: Option<String>,
    result: Option<String>,
    #[serde(default)]
    is_error: bool,
    num_turns: Option<u64>,
    duration_ms: Option<u64>,
    total_cost_usd: Option<f64>,
}

/// Line-buffering renderer for agent JSON on stdout.
#[derive(Debug, Default)]
pub struct AgentJsonRenderer {
    pending: String,
}

impl AgentJsonRenderer {
    /// Create a renderer with an empty line buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl OutputTransformer for AgentJsonRenderer {
    fn handle_chunk(&mut self, stream: StreamKind, chunk: &str) -> Vec<OutputEvent> {
        if stream == StreamKind::Stderr {
            return if chunk.is_empty() {
                Vec::new()
            } else {
                vec![OutputEvent::stderr(chunk)]
            };
        }

        self.pending.push_str(chunk);
        let mut events = Vec::new();
        while let Some(newline) = self.pending.find('\n') {
            let line: String = self.pending.drain(..=newline).collect();
            events.extend(render_line(&line));
        }
        events
    }

    fn finalize(&mut self) -> Vec<OutputEvent> {
        let rest = std::mem::take(&mut self.pending);
        render_line(&rest).into_iter().collect()
    }
}

/// Parse one transcript line and render it, or `None` if it is blank,
/// malformed, or carries nothing worth showing.
fn render_line(line: &str) -> Option<OutputEvent> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let message: AgentMessage = match serde_json::from_str(line) {
        Ok(message) => message,
        Err(err) => {
            debug!(%err, "skipping unparseable agent json line");
            return None;
        }
    };

    let text = render_message(message);
    if text.is_empty() {
        None
    } else {
        Some(OutputEvent::stdout(text))
    }
}

fn render_message(message: AgentMessage) -> String {
    match message {
        AgentMessage::System { subtype, model } => {
            if subtype.as_deref() != Some("init") {
                return String::new();
            }
            match model {
                Some(model) => format!("_Agent session started (model: {model})_\n\n"),
                None => "_Agent session started_\n\n".to_owned(),
            }
        }
        AgentMessage::Assistant { message } => {
            message.blocks().into_iter().map(render_assistant_block).collect()
        }
        AgentMessage::User { message } => {
            message.blocks().into_iter().map(render_user_block).collect()
        }
        AgentMessage::Result(record) => render_result(&record),
        AgentMessage::Unknown => String::new(),
    }
}

fn render_assistant_block(block: ContentBlock) -> String {
    match block {
        ContentBlock::Text { text } => {
            let text = text.trim_end();
            if text.is_empty() {
                String::new()
            } else {
                format!("{text}\n\n")
            }
        }
        ContentBlock::ToolUse { name, input } => match summarize_input(&input) {
            Some(summary) => format!("🔧 **{name}** `{summary}`\n\n"),
            None => format!("🔧 **{name}**\n\n"),
        },
        ContentBlock::ToolResult { .. } | ContentBlock::Unknown => String::new(),
    }
}

fn render_user_block(block: ContentBlock) -> String {
    let ContentBlock::ToolResult { content, is_error } = block else {
        return String::new();
    };
    let body = truncate_result(&tool_result_text(&content));
    if body.trim().is_empty() {
        return if is_error {
            "**Tool error**\n\n".to_owned()
        } else {
            String::new()
        };
    }
    let heading = if is_error { "**Tool error**\n" } else { "" };
    format!("{heading}```\n{}\n```\n\n", body.trim_end())
}

fn render_result(record: &ResultRecord) -> String {
    let succeeded = !record.is_error && record.subtype.as_deref().unwrap_or("success") == "success";

    let mut stats = Vec::new();
    if let Some(turns) = record.num_turns {
        stats.push(format!("{turns} turns"));
    }
    if let Some(ms) = record.duration_ms {
        stats.push(format!("{}.{}s", ms / 1000, (ms % 1000) / 100));
    }
    if let Some(cost) = record.total_cost_usd {
        stats.push(format!("${cost:.4}"));
    }
    let stats = if stats.is_empty() {
        String::new()
    } else {
        format!(" ({})", stats.join(", "))
    };

    if succeeded {
        format!("---\n✅ **Done**{stats}\n")
    } else {
        let reason = record.subtype.as_deref().unwrap_or("error");
        let mut out = format!("---\n❌ **Run ended: {reason}**{stats}\n");
        if let Some(result) = record.result.as_deref().filter(|r| !r.trim().is_empty()) {
            out.push('\n');
            out.push_str(result.trim_end());
            out.push('\n');
        }
        out
    }
}

/// One-line description of a tool call's arguments.
fn summarize_input(input: &Value) -> Option<String> {
    let Value::Object(map) = input else {
        return None;
    };
    if map.is_empty() {
        return None;
    }
    let preferred = SUMMARY_KEYS
        .iter()
        .find_map(|key| map.get(*key).and_then(Value::as_str));
    let raw = preferred.map_or_else(|| input.to_string(), str::to_owned);
    let single_line = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    Some(truncate_chars(&single_line, MAX_SUMMARY_CHARS))
}

/// Flatten tool-result content (a string or a list of text blocks).
fn tool_result_text(content: &Value) -> String {
    match content {
        Value::String(text) => text.clone(),
        Value::Array(items) => items
            .iter()
            .filter_map(|item| item.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n"),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn truncate_result(text: &str) -> String {
    let total_lines = text.lines().count();
    let mut kept: String = text
        .lines()
        .take(MAX_RESULT_LINES)
        .collect::<Vec<_>>()
        .join("\n");
    let mut truncated = total_lines > MAX_RESULT_LINES;
    if kept.chars().count() > MAX_RESULT_CHARS {
        kept = kept.chars().take(MAX_RESULT_CHARS).collect();
        truncated = true;
    }
    if truncated {
        kept.push_str("\n… (truncated)");
    }
    kept
}

fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_owned();
    }
    let mut out: String = text.chars().take(max).collect();
    out.push('…');
    out
}
