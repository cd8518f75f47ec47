//! Process launcher.
//!
//! Spawns a command through the configured shell in the project root,
//! registers the [`Session`], and hands the child to a pump task that
//! owns its pipes and its transformer. The pump feeds decoded chunks
//! through the transformer into the event log and, once both pipes close
//! and the child is reaped, writes the single terminal event.

use std::io;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tracing::{debug, info, info_span, warn, Instrument};

use super::cleanup::schedule_eviction;
use super::registry::SessionRegistry;
use super::session::Session;
use super::signal::terminating_signal;
use crate::models::event::{OutputEvent, StreamKind};
use crate::transform::OutputTransformer;

/// Initial capacity of each pipe's read buffer.
const READ_CHUNK: usize = 8 * 1024;

/// Everything the launcher needs besides the command itself.
#[derive(Debug, Clone)]
pub(crate) struct LaunchContext {
    pub registry: Arc<SessionRegistry>,
    pub shell: String,
    pub project_root: PathBuf,
    pub process_groups: bool,
    pub cleanup_delay: Duration,
}

impl LaunchContext {
    fn shell_command(&self, command: &str) -> Command {
        let mut cmd = Command::new(&self.shell);
        if cfg!(windows) {
            cmd.arg("/C");
        } else {
            cmd.arg("-c");
        }
        cmd.arg(command);
        cmd.current_dir(&self.project_root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        {
            if self.process_groups {
                cmd.process_group(0);
            }
        }
        cmd
    }
}

/// Create, register, and spawn a session for `command`.
///
/// Never fails: a spawn failure is recorded as the session's terminal
/// `error` event so the client learns about it through the stream.
pub(crate) fn launch(
    ctx: &LaunchContext,
    command: &str,
    transformer: Box<dyn OutputTransformer>,
) -> Arc<Session> {
    let session = Arc::new(Session::new(command));
    ctx.registry.insert(Arc::clone(&session));

    let span = info_span!("start_session", session_id = session.id());
    let _guard = span.enter();

    let mut child = match ctx.shell_command(command).spawn() {
        Ok(child) => child,
        Err(err) => {
            warn!(%err, shell = %ctx.shell, "command failed to start");
            session.complete(None, |_| OutputEvent::Error {
                message: format!("Failed to start command: {err}"),
            });
            finish(ctx, &session);
            return session;
        }
    };

    let pid = child.id();
    session.set_pid(pid);
    info!(pid = pid.unwrap_or(0), command, "command started");

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let pump_ctx = ctx.clone();
    let pump_session = Arc::clone(&session);
    tokio::spawn(
        async move {
            pump(&pump_session, child, stdout, stderr, transformer).await;
            finish(&pump_ctx, &pump_session);
        }
        .instrument(span.clone()),
    );

    session
}

/// Schedule eviction of a completed session.
fn finish(ctx: &LaunchContext, session: &Session) {
    let _ = schedule_eviction(
        Arc::clone(&ctx.registry),
        session.id().to_owned(),
        ctx.cleanup_delay,
    );
}

/// Drain both pipes through the transformer, then reap the child and
/// record the terminal event.
async fn pump(
    session: &Session,
    mut child: Child,
    stdout: Option<ChildStdout>,
    stderr: Option<ChildStderr>,
    mut transformer: Box<dyn OutputTransformer>,
) {
    let mut stdout = stdout;
    let mut stderr = stderr;
    let mut stdout_buf = BytesMut::with_capacity(READ_CHUNK);
    let mut stderr_buf = BytesMut::with_capacity(READ_CHUNK);

    while stdout.is_some() || stderr.is_some() {
        tokio::select! {
            read = read_chunk(&mut stdout, &mut stdout_buf) => {
                let open = on_read(session, transformer.as_mut(), StreamKind::Stdout, read, &mut stdout_buf);
                if !open {
                    stdout = None;
                }
            }
            read = read_chunk(&mut stderr, &mut stderr_buf) => {
                let open = on_read(session, transformer.as_mut(), StreamKind::Stderr, read, &mut stderr_buf);
                if !open {
                    stderr = None;
                }
            }
        }
    }

    let status = child.wait().await;

    for event in transformer.finalize() {
        session.append(event);
    }

    match status {
        Ok(status) => {
            let code = status.code();
            info!(exit_code = ?code, stop_requested = session.stop_requested(), "command exited");
            session.complete(code, |stop_requested| OutputEvent::Exit {
                message: exit_message(stop_requested, &status),
                code,
            });
        }
        Err(err) => {
            warn!(%err, "failed to wait for command");
            session.complete(None, |_| OutputEvent::Error {
                message: format!("Failed to wait for command: {err}"),
            });
        }
    }
}

/// Read into `buf` from `reader`, or pend forever once the pipe is closed.
async fn read_chunk<R>(reader: &mut Option<R>, buf: &mut BytesMut) -> io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    match reader {
        Some(reader) => reader.read_buf(buf).await,
        None => std::future::pending().await,
    }
}

/// Route one read result through the transformer. Returns whether the
/// pipe is still open.
fn on_read(
    session: &Session,
    transformer: &mut dyn OutputTransformer,
    stream: StreamKind,
    read: io::Result<usize>,
    buf: &mut BytesMut,
) -> bool {
    let (text, open) = match read {
        Ok(0) => (flush_utf8(buf), false),
        Ok(_) => (take_utf8(buf), true),
        Err(err) => {
            warn!(%err, ?stream, "pipe read failed; treating as closed");
            (flush_utf8(buf), false)
        }
    };
    if !open {
        debug!(?stream, "pipe closed");
    }
    if !text.is_empty() {
        for event in transformer.handle_chunk(stream, &text) {
            session.append(event);
        }
    }
    open
}

/// Decode the longest complete UTF-8 prefix of `buf`, leaving a trailing
/// partial character in place. Invalid sequences become U+FFFD.
fn take_utf8(buf: &mut BytesMut) -> String {
    let mut text = String::new();
    loop {
        match std::str::from_utf8(buf) {
            Ok(valid) => {
                text.push_str(valid);
                buf.clear();
                return text;
            }
            Err(err) => {
                let valid_len = err.valid_up_to();
                text.push_str(&String::from_utf8_lossy(&buf[..valid_len]));
                match err.error_len() {
                    Some(bad_len) => {
                        text.push(char::REPLACEMENT_CHARACTER);
                        buf.advance(valid_len + bad_len);
                    }
                    None => {
                        buf.advance(valid_len);
                        return text;
                    }
                }
            }
        }
    }
}

/// Decode whatever remains at end of stream, replacing a dangling partial
/// character.
fn flush_utf8(buf: &mut BytesMut) -> String {
    let text = String::from_utf8_lossy(buf).into_owned();
    buf.clear();
    text
}

fn exit_message(stop_requested: bool, status: &ExitStatus) -> String {
    match (stop_requested, terminating_signal(status)) {
        (true, Some(signal)) => format!("Process stopped by user ({signal})"),
        (true, None) => "Process stopped by user".to_owned(),
        (false, Some(signal)) => format!("Process terminated by signal {signal}"),
        (false, None) => "Process exited".to_owned(),
    }
}
