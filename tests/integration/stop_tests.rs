//! Stop escalation against real process groups, plus scripted signal
//! targets for the delivery-failure paths.

use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};

use serial_test::serial;

use remote_runner::models::event::OutputEvent;
use remote_runner::models::session::StopOutcome;
use remote_runner::runner::signal::{DeliveryError, DeliveryRoute};
use remote_runner::runner::{SessionRunner, SignalTarget, StopSignal};

use super::test_helpers::{
    collect_events, stderr_of, terminal_of, test_config, test_runner, wait_for_completion,
    wait_for_stdout, TEST_TIMEOUT,
};

/// Ignores SIGINT and SIGTERM in the shell and in everything it starts.
const STUBBORN: &str = "trap '' INT TERM; echo ready; sleep 30";

#[tokio::test]
#[serial]
async fn stop_interrupts_a_running_command() {
    let (_dir, runner) = test_runner();
    let session = runner.start("echo ready; sleep 30", None).expect("start");
    wait_for_stdout(&session, "ready").await;
    let pid = session.pid().expect("pid recorded");

    assert_eq!(runner.stop(session.id()), StopOutcome::Stopping);
    assert!(session.stop_requested());
    assert!(session.summary().stop_requested);

    let events = collect_events(runner.attach(session.id()).expect("attach")).await;
    let stderr = stderr_of(&events);
    assert!(stderr.contains("\n[stop requested]\n"), "{stderr}");
    assert!(
        stderr.contains(&format!("[sent SIGINT to process group {pid}]")),
        "{stderr}"
    );
    match terminal_of(&events) {
        OutputEvent::Exit { message, .. } => {
            assert!(message.starts_with("Process stopped by user"), "{message}");
        }
        other => panic!("expected exit, got {other:?}"),
    }
}

#[tokio::test]
#[serial]
async fn stubborn_command_is_force_killed() {
    let (_dir, runner) = test_runner();
    let session = runner.start(STUBBORN, None).expect("start");
    wait_for_stdout(&session, "ready").await;
    let pid = session.pid().expect("pid recorded");

    assert_eq!(runner.stop(session.id()), StopOutcome::Stopping);
    assert!(session.force_kill_armed());

    let events = collect_events(runner.attach(session.id()).expect("attach")).await;
    let stderr = stderr_of(&events);
    assert!(
        stderr.contains(&format!(
            "[process still running after 0.3s; sent SIGKILL to process group {pid}]"
        )),
        "{stderr}"
    );
    assert_eq!(
        terminal_of(&events),
        &OutputEvent::Exit {
            message: "Process stopped by user (SIGKILL)".into(),
            code: None,
        }
    );
    assert_eq!(session.exit_code(), None);
    assert!(!session.force_kill_armed());
}

#[tokio::test]
#[serial]
async fn repeated_stop_arms_one_timer() {
    let (_dir, runner) = test_runner();
    let session = runner.start(STUBBORN, None).expect("start");
    wait_for_stdout(&session, "ready").await;

    assert_eq!(runner.stop(session.id()), StopOutcome::Stopping);
    assert_eq!(runner.stop(session.id()), StopOutcome::Stopping);

    let events = collect_events(runner.attach(session.id()).expect("attach")).await;
    let stderr = stderr_of(&events);
    assert!(stderr.contains("[stop requested again]"), "{stderr}");
    assert_eq!(stderr.matches("sent SIGKILL").count(), 1, "{stderr}");
    terminal_of(&events);
}

#[tokio::test]
async fn stop_after_exit_reports_completion() {
    let (_dir, runner) = test_runner();
    let session = runner.start("exit 4", None).expect("start");
    wait_for_completion(&session).await;
    let before = session.events();

    assert_eq!(
        runner.stop(session.id()),
        StopOutcome::AlreadyComplete { exit_code: Some(4) }
    );
    assert_eq!(session.events(), before);
    assert!(!session.stop_requested());
}

#[tokio::test]
async fn stop_of_unknown_session_is_not_found() {
    let (_dir, runner) = test_runner();
    assert_eq!(runner.stop("no-such-session"), StopOutcome::NotFound);
}

#[tokio::test]
async fn stop_of_failed_spawn_reports_completion() {
    let (_dir, mut config) = test_config();
    config.shell = "/nonexistent/shell".into();
    let runner = SessionRunner::new(&config);
    let session = runner.start("true", None).expect("session created");

    assert_eq!(
        runner.stop(session.id()),
        StopOutcome::AlreadyComplete { exit_code: None }
    );
}

/// Scripted delivery results, recording every call.
#[derive(Debug)]
struct ScriptedTarget {
    calls: Mutex<Vec<(u32, StopSignal)>>,
    respond: fn(StopSignal) -> Result<DeliveryRoute, DeliveryError>,
}

impl ScriptedTarget {
    fn new(respond: fn(StopSignal) -> Result<DeliveryRoute, DeliveryError>) -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            respond,
        })
    }

    fn calls(&self) -> Vec<(u32, StopSignal)> {
        self.calls.lock().expect("calls lock").clone()
    }
}

impl SignalTarget for ScriptedTarget {
    fn deliver(&self, pid: u32, signal: StopSignal) -> Result<DeliveryRoute, DeliveryError> {
        self.calls.lock().expect("calls lock").push((pid, signal));
        (self.respond)(signal)
    }
}

async fn wait_for_stderr(session: &remote_runner::runner::Session, needle: &str) -> String {
    let poll = async {
        loop {
            let stderr = stderr_of(&session.events());
            if stderr.contains(needle) {
                return stderr;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    };
    tokio::time::timeout(TEST_TIMEOUT, poll)
        .await
        .unwrap_or_else(|_| panic!("stderr never contained {needle:?}"))
}

#[tokio::test]
async fn escalation_falls_through_to_terminate() {
    let (_dir, config) = test_config();
    let target = ScriptedTarget::new(|signal| match signal {
        StopSignal::Interrupt => Err(DeliveryError::Gone),
        StopSignal::Terminate => Ok(DeliveryRoute::Process),
        StopSignal::Kill => Ok(DeliveryRoute::Group),
    });
    let runner = SessionRunner::with_signal_target(&config, target.clone());
    let session = runner.start("echo ready; sleep 2", None).expect("start");
    wait_for_stdout(&session, "ready").await;
    let pid = session.pid().expect("pid recorded");

    assert_eq!(runner.stop(session.id()), StopOutcome::Stopping);
    let stderr = wait_for_stderr(&session, "sent SIGKILL").await;

    assert!(stderr.contains(&format!("[sent SIGTERM to process {pid}]")), "{stderr}");
    assert!(
        stderr.contains(&format!("sent SIGKILL to process group {pid}]")),
        "{stderr}"
    );
    assert_eq!(
        target.calls(),
        vec![
            (pid, StopSignal::Interrupt),
            (pid, StopSignal::Terminate),
            (pid, StopSignal::Kill),
        ]
    );

    // The scripted target never signalled anything, so the command ends on
    // its own and is still attributed to the stop request.
    let events = collect_events(runner.attach(session.id()).expect("attach")).await;
    assert_eq!(
        terminal_of(&events),
        &OutputEvent::Exit {
            message: "Process stopped by user".into(),
            code: Some(0),
        }
    );
}

#[tokio::test]
async fn delivery_failures_are_reported_in_the_log() {
    let (_dir, config) = test_config();
    let target = ScriptedTarget::new(|_| Err(DeliveryError::NotPermitted));
    let runner = SessionRunner::with_signal_target(&config, target.clone());
    let session = runner.start("echo ready; sleep 2", None).expect("start");
    wait_for_stdout(&session, "ready").await;

    assert_eq!(runner.stop(session.id()), StopOutcome::Stopping);
    let stderr = wait_for_stderr(&session, "[failed to send SIGKILL").await;

    assert!(
        stderr.contains("[could not deliver SIGINT or SIGTERM: operation not permitted]"),
        "{stderr}"
    );
    assert!(
        stderr.contains("[failed to send SIGKILL: operation not permitted]"),
        "{stderr}"
    );
    assert_eq!(target.calls().len(), 3);
}

#[tokio::test]
async fn timer_does_not_fire_after_natural_exit() {
    let (_dir, mut config) = test_config();
    config.runner.force_kill_delay_ms = 1_000;
    let target = ScriptedTarget::new(|_| Ok(DeliveryRoute::Group));
    let runner = SessionRunner::with_signal_target(&config, target.clone());
    let session = runner.start("echo ready; sleep 0.3", None).expect("start");
    wait_for_stdout(&session, "ready").await;

    assert_eq!(runner.stop(session.id()), StopOutcome::Stopping);
    wait_for_completion(&session).await;
    tokio::time::sleep(Duration::from_millis(1_200)).await;

    let signals: Vec<StopSignal> = target.calls().into_iter().map(|(_, s)| s).collect();
    assert_eq!(signals, vec![StopSignal::Interrupt]);
    assert!(!stderr_of(&session.events()).contains("SIGKILL"));
}

/// Delivers nothing; each call blocks until the session has exited on its
/// own, so the stop request observes completion midway.
#[derive(Debug, Default)]
struct WaitForExitTarget {
    session: OnceLock<Arc<remote_runner::runner::Session>>,
}

impl SignalTarget for WaitForExitTarget {
    fn deliver(&self, _pid: u32, _signal: StopSignal) -> Result<DeliveryRoute, DeliveryError> {
        let deadline = Instant::now() + TEST_TIMEOUT;
        while Instant::now() < deadline {
            if let Some(session) = self.session.get() {
                if session.is_complete() {
                    break;
                }
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        Err(DeliveryError::Gone)
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn exit_during_stop_reports_completion() {
    let (_dir, config) = test_config();
    let target = Arc::new(WaitForExitTarget::default());
    let runner = SessionRunner::with_signal_target(&config, target.clone());
    let session = runner.start("echo ready; sleep 0.2", None).expect("start");
    target.session.set(Arc::clone(&session)).expect("set once");
    wait_for_stdout(&session, "ready").await;

    let stopper = runner.clone();
    let id = session.id().to_owned();
    let outcome = tokio::task::spawn_blocking(move || stopper.stop(&id))
        .await
        .expect("stop task");

    assert_eq!(outcome, StopOutcome::AlreadyComplete { exit_code: Some(0) });
    assert!(!session.force_kill_armed());
}

#[tokio::test]
#[serial]
async fn kill_all_takes_down_the_whole_process_group() {
    let (_dir, runner) = test_runner();
    let running = runner.start("echo ready; sleep 30; echo done", None).expect("start");
    let finished = runner.start("true", None).expect("start");
    wait_for_stdout(&running, "ready").await;
    wait_for_completion(&finished).await;
    let pgid = running.pid().expect("pid recorded");

    assert_eq!(runner.kill_all(), 1);

    let events = collect_events(runner.attach(running.id()).expect("attach")).await;
    let stderr = stderr_of(&events);
    assert!(
        stderr.contains(&format!("[server shutting down; sent SIGKILL to process group {pgid}]")),
        "{stderr}"
    );
    assert_eq!(
        terminal_of(&events),
        &OutputEvent::Exit {
            message: "Process terminated by signal SIGKILL".into(),
            code: None,
        }
    );

    // The `sleep` the shell started is in the same group and must be gone
    // too, not just the shell.
    #[cfg(target_os = "linux")]
    {
        let poll = async {
            while !live_group_members(pgid).is_empty() {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        };
        tokio::time::timeout(TEST_TIMEOUT, poll)
            .await
            .unwrap_or_else(|_| panic!("group {pgid} survivors: {:?}", live_group_members(pgid)));
    }
    assert_eq!(runner.kill_all(), 0);
}

/// PIDs of non-zombie processes whose process group is `pgid`.
///
/// Orphaned zombies may linger until init reaps them, so they are ignored.
#[cfg(target_os = "linux")]
fn live_group_members(pgid: u32) -> Vec<u32> {
    let Ok(entries) = std::fs::read_dir("/proc") else {
        return Vec::new();
    };
    entries
        .filter_map(Result::ok)
        .filter_map(|entry| entry.file_name().to_str()?.parse::<u32>().ok())
        .filter(|pid| {
            let Ok(stat) = std::fs::read_to_string(format!("/proc/{pid}/stat")) else {
                return false;
            };
            // Fields after the parenthesised command: state, ppid, pgrp.
            let Some((_, rest)) = stat.rsplit_once(')') else {
                return false;
            };
            let mut fields = rest.split_whitespace();
            let state = fields.next();
            let pgrp = fields.nth(1).and_then(|field| field.parse::<u32>().ok());
            state != Some("Z") && pgrp == Some(pgid)
        })
        .collect()
}
