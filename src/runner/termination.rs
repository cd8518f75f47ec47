//! Stop escalation: graceful signals first, `SIGKILL` after a delay.
//!
//! Every step is recorded as a `stderr` diagnostic in the session's own
//! log, so the client watching the stream sees what happened. Delivery
//! failures are never fatal; the force-kill timer is armed regardless.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, info_span, warn, Instrument};

use super::registry::SessionRegistry;
use super::session::{Session, StopRequest};
use super::signal::{DeliveryError, SignalTarget, StopSignal};
use crate::models::event::OutputEvent;
use crate::models::session::StopOutcome;

/// Dependencies shared by every stop request.
#[derive(Debug, Clone)]
pub(crate) struct TerminationContext {
    pub registry: Arc<SessionRegistry>,
    pub signals: Arc<dyn SignalTarget>,
    pub force_kill_delay: Duration,
}

/// Request that `session_id` stop.
///
/// Returns immediately; the real outcome arrives later as the session's
/// `exit` event.
pub(crate) fn stop(ctx: &TerminationContext, session_id: &str) -> StopOutcome {
    let span = info_span!("stop_session", session_id);
    let _guard = span.enter();

    let Some(session) = ctx.registry.get(session_id) else {
        debug!("stop requested for unknown session");
        return StopOutcome::NotFound;
    };

    let (pid, repeated) = match session.request_stop() {
        StopRequest::AlreadyComplete { exit_code } => {
            debug!(?exit_code, "stop requested after completion");
            return StopOutcome::AlreadyComplete { exit_code };
        }
        StopRequest::Accepted { pid, repeated } => (pid, repeated),
    };

    session.append(OutputEvent::stderr(if repeated {
        "\n[stop requested again]\n"
    } else {
        "\n[stop requested]\n"
    }));

    match pid {
        Some(pid) => send_graceful(ctx.signals.as_ref(), &session, pid),
        None => {
            warn!("no pid recorded; cannot signal");
            session.append(OutputEvent::stderr(
                "[no process id available; could not deliver a stop signal]\n",
            ));
        }
    }

    let armed = session.arm_force_kill(|| {
        let timer_ctx = ctx.clone();
        let timer_session = Arc::clone(&session);
        tokio::spawn(
            async move {
                tokio::time::sleep(timer_ctx.force_kill_delay).await;
                force_kill(&timer_ctx, &timer_session, pid);
            }
            .instrument(span.clone()),
        )
    });
    if armed {
        info!(delay = ?ctx.force_kill_delay, "force-kill timer armed");
    } else if session.is_complete() {
        debug!("process exited during stop request");
        return StopOutcome::AlreadyComplete {
            exit_code: session.exit_code(),
        };
    }

    StopOutcome::Stopping
}

/// Send `SIGKILL` to every session that has not completed.
///
/// Used on server shutdown. Returns how many sessions were signalled.
pub(crate) fn kill_all(ctx: &TerminationContext) -> usize {
    let mut killed = 0;
    for session in ctx.registry.sessions() {
        if session.is_complete() {
            continue;
        }
        let Some(pid) = session.pid() else {
            continue;
        };
        match ctx.signals.deliver(pid, StopSignal::Kill) {
            Ok(route) => {
                info!(session_id = session.id(), pid, %route, "killed on shutdown");
                session.append(OutputEvent::stderr(format!(
                    "\n[server shutting down; sent SIGKILL to {route} {pid}]\n"
                )));
                killed += 1;
            }
            Err(err) => {
                warn!(session_id = session.id(), pid, %err, "SIGKILL not delivered on shutdown");
            }
        }
    }
    killed
}

/// Try each graceful signal in order, stopping at the first the OS
/// accepts.
fn send_graceful(signals: &dyn SignalTarget, session: &Session, pid: u32) {
    let mut last_error: Option<DeliveryError> = None;
    for signal in StopSignal::GRACEFUL {
        match signals.deliver(pid, signal) {
            Ok(route) => {
                info!(pid, signal = signal.name(), %route, "stop signal delivered");
                session.append(OutputEvent::stderr(format!(
                    "[sent {} to {route} {pid}]\n",
                    signal.name()
                )));
                return;
            }
            Err(err) => {
                warn!(pid, signal = signal.name(), %err, "stop signal not delivered");
                last_error = Some(err);
            }
        }
    }

    let reason = last_error.map_or_else(String::new, |err| format!(": {err}"));
    session.append(OutputEvent::stderr(format!(
        "[could not deliver SIGINT or SIGTERM{reason}]\n"
    )));
}

/// Deliver `SIGKILL` if the session is still registered and running.
fn force_kill(ctx: &TerminationContext, session: &Session, pid: Option<u32>) {
    if ctx.registry.get(session.id()).is_none() || session.is_complete() {
        debug!("process exited before force-kill");
        return;
    }
    let Some(pid) = pid else {
        return;
    };

    let delay = ctx.force_kill_delay.as_secs_f32();
    match ctx.signals.deliver(pid, StopSignal::Kill) {
        Ok(route) => {
            warn!(pid, %route, "process ignored stop; sent SIGKILL");
            session.append(OutputEvent::stderr(format!(
                "[process still running after {delay:.1}s; sent SIGKILL to {route} {pid}]\n"
            )));
        }
        Err(err) => {
            warn!(pid, %err, "SIGKILL not delivered");
            session.append(OutputEvent::stderr(format!(
                "[failed to send SIGKILL: {err}]\n"
            )));
        }
    }
}
