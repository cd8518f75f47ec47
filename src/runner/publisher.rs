//! Stream publisher: one independent reader per subscriber.
//!
//! A subscription replays the event log from index 0, then tails new
//! events until the session completes. Each subscriber owns its cursor
//! and heartbeat timer; dropping the stream (client disconnect) releases
//! only those and never touches the process.

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{self, Stream};
use tokio::sync::watch;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::debug;

use super::session::Session;
use crate::models::event::OutputEvent;

/// One item written to a subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamFrame {
    /// An event from the log, in log order.
    Event(OutputEvent),
    /// Idle keep-alive for intermediaries; carries no data.
    Heartbeat,
}

/// Boxed frame stream handed to the transport.
pub type FrameStream = Pin<Box<dyn Stream<Item = StreamFrame> + Send>>;

/// Metadata plus the frame stream for one attached subscriber.
pub struct Subscription {
    session_id: String,
    command: String,
    frames: FrameStream,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("session_id", &self.session_id)
            .field("command", &self.command)
            .finish_non_exhaustive()
    }
}

impl Subscription {
    /// Attach a new subscriber to `session`.
    #[must_use]
    pub fn attach(session: Arc<Session>, heartbeat_interval: Duration) -> Self {
        Self {
            session_id: session.id().to_owned(),
            command: session.command().to_owned(),
            frames: Box::pin(frames(session, heartbeat_interval)),
        }
    }

    /// Session token, sent to the client before any frame.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Original command text.
    #[must_use]
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Command text percent-encoded for use in a header value.
    #[must_use]
    pub fn encoded_command(&self) -> String {
        urlencoding::encode(&self.command).into_owned()
    }

    /// Consume the subscription, yielding its frame stream.
    #[must_use]
    pub fn into_frames(self) -> FrameStream {
        self.frames
    }
}

struct Cursor {
    session: Arc<Session>,
    next: usize,
    pending: VecDeque<OutputEvent>,
    changes: watch::Receiver<u64>,
    heartbeat: Interval,
    drained_terminal: bool,
}

impl Drop for Cursor {
    fn drop(&mut self) {
        debug!(
            session_id = self.session.id(),
            delivered = self.next - self.pending.len(),
            "subscriber detached"
        );
    }
}

fn frames(
    session: Arc<Session>,
    heartbeat_interval: Duration,
) -> impl Stream<Item = StreamFrame> + Send {
    // Subscribe before the first drain so nothing appended in between is missed.
    let changes = session.subscribe_changes();
    let mut heartbeat =
        tokio::time::interval_at(Instant::now() + heartbeat_interval, heartbeat_interval);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    debug!(session_id = session.id(), "subscriber attached");

    let cursor = Cursor {
        session,
        next: 0,
        pending: VecDeque::new(),
        changes,
        heartbeat,
        drained_terminal: false,
    };

    stream::unfold(cursor, |mut cursor| async move {
        loop {
            if let Some(event) = cursor.pending.pop_front() {
                return Some((StreamFrame::Event(event), cursor));
            }
            if cursor.drained_terminal {
                return None;
            }

            let (batch, complete) = cursor.session.events_since(cursor.next);
            cursor.next += batch.len();
            cursor.pending.extend(batch);
            if complete {
                cursor.drained_terminal = true;
                continue;
            }
            if !cursor.pending.is_empty() {
                continue;
            }

            tokio::select! {
                changed = cursor.changes.changed() => {
                    if changed.is_err() {
                        // Sender lives in the session we hold; only reachable if
                        // the session is torn down, so do one last drain.
                        cursor.drained_terminal = true;
                        let (batch, _) = cursor.session.events_since(cursor.next);
                        cursor.next += batch.len();
                        cursor.pending.extend(batch);
                    }
                }
                _ = cursor.heartbeat.tick() => {
                    return Some((StreamFrame::Heartbeat, cursor));
                }
            }
        }
    })
}
