use chrono::{TimeZone, Utc};
use serde_json::json;

use remote_runner::models::event::{OutputEvent, StreamKind};
use remote_runner::models::session::{SessionSummary, StopOutcome};
use remote_runner::transform::OutputFormat;

#[test]
fn output_events_serialize_with_type_tag() {
    assert_eq!(
        serde_json::to_value(OutputEvent::stdout("hi\n")).expect("json"),
        json!({"type": "stdout", "text": "hi\n"})
    );
    assert_eq!(
        serde_json::to_value(OutputEvent::stderr("oops")).expect("json"),
        json!({"type": "stderr", "text": "oops"})
    );
    assert_eq!(
        serde_json::to_value(OutputEvent::Exit {
            message: "Process exited".into(),
            code: Some(0),
        })
        .expect("json"),
        json!({"type": "exit", "message": "Process exited", "code": 0})
    );
    assert_eq!(
        serde_json::to_value(OutputEvent::Exit {
            message: "Process stopped by user (SIGKILL)".into(),
            code: None,
        })
        .expect("json"),
        json!({"type": "exit", "message": "Process stopped by user (SIGKILL)", "code": null})
    );
    assert_eq!(
        serde_json::to_value(OutputEvent::Error {
            message: "Failed to start command: nope".into(),
        })
        .expect("json"),
        json!({"type": "error", "message": "Failed to start command: nope"})
    );
}

#[test]
fn only_exit_and_error_are_terminal() {
    assert!(!OutputEvent::stdout("x").is_terminal());
    assert!(!OutputEvent::stderr("x").is_terminal());
    assert!(OutputEvent::Exit {
        message: String::new(),
        code: None
    }
    .is_terminal());
    assert!(OutputEvent::Error {
        message: String::new()
    }
    .is_terminal());
}

#[test]
fn stream_kind_selects_event_variant() {
    assert_eq!(StreamKind::Stdout.event("a"), OutputEvent::stdout("a"));
    assert_eq!(StreamKind::Stderr.event("b"), OutputEvent::stderr("b"));
}

#[test]
fn stop_outcomes_serialize_with_status_tag() {
    assert_eq!(
        serde_json::to_value(StopOutcome::Stopping).expect("json"),
        json!({"status": "stopping"})
    );
    assert_eq!(
        serde_json::to_value(StopOutcome::NotFound).expect("json"),
        json!({"status": "not_found"})
    );
    assert_eq!(
        serde_json::to_value(StopOutcome::AlreadyComplete { exit_code: Some(2) }).expect("json"),
        json!({"status": "already_complete", "exit_code": 2})
    );
}

#[test]
fn summary_omits_exit_code_until_known() {
    let start = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).single().expect("valid time");
    let mut summary = SessionSummary {
        id: "abc".into(),
        command: "make test".into(),
        start_time: start,
        is_complete: false,
        exit_code: None,
        stop_requested: false,
    };
    let running = serde_json::to_value(&summary).expect("json");
    assert!(running.get("exit_code").is_none());
    assert_eq!(running["start_time"], json!("2024-05-01T12:00:00Z"));

    summary.is_complete = true;
    summary.exit_code = Some(0);
    let done = serde_json::to_value(&summary).expect("json");
    assert_eq!(done["exit_code"], json!(0));
    assert_eq!(done["is_complete"], json!(true));
}

#[test]
fn output_format_parses_snake_case() {
    let parsed: OutputFormat = serde_json::from_value(json!("agent_json")).expect("parse");
    assert_eq!(parsed, OutputFormat::AgentJson);
    assert_eq!(OutputFormat::default(), OutputFormat::Raw);
    assert!(serde_json::from_value::<OutputFormat>(json!("markdown")).is_err());
}
