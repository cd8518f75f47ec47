#![forbid(unsafe_code)]

//! `remote-runner-ctl`: terminal companion for `remote-runner`.
//!
//! Starts commands, reattaches to running sessions, stops them, and lists
//! what the server knows about, over the server's HTTP API.

use std::io::Write;
use std::pin::pin;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use eventsource_stream::Eventsource;
use futures_util::{future, Stream, StreamExt};
use serde_json::{json, Value};

#[derive(Debug, Parser)]
#[command(
    name = "remote-runner-ctl",
    about = "Terminal client for the remote-runner server",
    version,
    long_about = None
)]
struct Cli {
    /// Base URL of the server.
    #[arg(long, default_value = "http://127.0.0.1:3000")]
    url: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start a command and stream its output.
    Run {
        /// Render newline-delimited agent JSON as Markdown.
        #[arg(long)]
        agent_json: bool,
        /// Command text; joined with spaces.
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },

    /// Reattach to a session, replaying its output from the start.
    Attach {
        /// Session token.
        session_id: String,
    },

    /// Stop a running session.
    Stop {
        /// Session token.
        session_id: String,
    },

    /// List known sessions.
    List,
}

type CtlResult<T> = std::result::Result<T, Box<dyn std::error::Error>>;

fn main() -> ExitCode {
    let args = Cli::parse();
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("Failed to start runtime: {err}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(dispatch(args)) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {err}");
            ExitCode::FAILURE
        }
    }
}

async fn dispatch(args: Cli) -> CtlResult<ExitCode> {
    let client = reqwest::Client::new();
    let base = args.url.trim_end_matches('/').to_owned();

    match args.command {
        Command::Run {
            agent_json,
            command,
        } => {
            let output = if agent_json { "agent_json" } else { "raw" };
            let body = json!({ "command": command.join(" "), "output": output });
            stream(&client, &base, &body).await
        }
        Command::Attach { session_id } => {
            stream(&client, &base, &json!({ "session_id": session_id })).await
        }
        Command::Stop { session_id } => {
            let response = client
                .post(format!("{base}/api/stop"))
                .json(&json!({ "session_id": session_id }))
                .send()
                .await?;
            let ok = response.status().is_success();
            let body: Value = response.json().await?;
            println!("{}", serde_json::to_string_pretty(&body)?);
            Ok(if ok {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Command::List => {
            let sessions: Vec<Value> = client
                .get(format!("{base}/api/sessions"))
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;
            for session in &sessions {
                println!("{}", format_summary(session));
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// POST a run request and copy the event stream to the terminal.
///
/// Exits with the command's exit code when it reports one.
async fn stream(client: &reqwest::Client, base: &str, body: &Value) -> CtlResult<ExitCode> {
    let response = client
        .post(format!("{base}/api/run"))
        .json(body)
        .send()
        .await?;

    if !response.status().is_success() {
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        return Err(format!("server returned {status}: {text}").into());
    }

    if let Some(id) = response
        .headers()
        .get("x-session-id")
        .and_then(|v| v.to_str().ok())
    {
        eprintln!("[session {id}]");
    }

    let mut frames = pin!(data_frames(response.bytes_stream()));
    let mut exit = ExitCode::SUCCESS;
    while let Some(data) = frames.next().await {
        let event: Value = serde_json::from_str(&data?)?;
        if let Some(code) = render(&event)? {
            exit = code;
        }
    }
    Ok(exit)
}

/// `data` payloads of an SSE body; comment frames (heartbeats) and
/// frames without data are dropped.
fn data_frames<S, B, E>(body: S) -> impl Stream<Item = CtlResult<String>>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: std::error::Error + Send + Sync + 'static,
{
    body.eventsource().filter_map(|frame| {
        future::ready(match frame {
            Ok(event) if event.data.is_empty() => None,
            Ok(event) => Some(Ok(event.data)),
            Err(err) => Some(Err(err.into())),
        })
    })
}

/// Print one event; returns the exit code carried by a terminal event.
fn render(event: &Value) -> CtlResult<Option<ExitCode>> {
    let text = event.get("text").and_then(Value::as_str).unwrap_or_default();
    let message = event
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or_default();

    match event.get("type").and_then(Value::as_str) {
        Some("stdout") => {
            let mut out = std::io::stdout().lock();
            out.write_all(text.as_bytes())?;
            out.flush()?;
            Ok(None)
        }
        Some("stderr") => {
            eprint!("{text}");
            Ok(None)
        }
        Some("exit") => {
            let code = event.get("code").and_then(Value::as_i64);
            match code {
                Some(code) => eprintln!("[{message}: code {code}]"),
                None => eprintln!("[{message}]"),
            }
            let code = code.and_then(|c| u8::try_from(c).ok()).unwrap_or(1);
            Ok(Some(ExitCode::from(code)))
        }
        Some("error") => {
            eprintln!("[error: {message}]");
            Ok(Some(ExitCode::FAILURE))
        }
        _ => Ok(None),
    }
}

fn format_summary(session: &Value) -> String {
    let field = |key: &str| {
        session
            .get(key)
            .map(|v| v.as_str().map_or_else(|| v.to_string(), str::to_owned))
            .unwrap_or_default()
    };
    let state = if session.get("is_complete").and_then(Value::as_bool) == Some(true) {
        match session.get("exit_code").and_then(Value::as_i64) {
            Some(code) => format!("exited {code}"),
            None => "done".to_owned(),
        }
    } else if session.get("stop_requested").and_then(Value::as_bool) == Some(true) {
        "stopping".to_owned()
    } else {
        "running".to_owned()
    };
    format!(
        "{}  {:<10}  {}  {}",
        field("id"),
        state,
        field("start_time"),
        field("command")
    )
}
