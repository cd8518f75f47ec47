use remote_runner::runner::RunTarget;
use remote_runner::transform::OutputFormat;
use remote_runner::AppError;

#[test]
fn command_only_is_a_new_run() {
    let target = RunTarget::from_parts(Some("npm test".into()), None, OutputFormat::AgentJson)
        .expect("valid");
    assert_eq!(
        target,
        RunTarget::New {
            command: "npm test".into(),
            output: OutputFormat::AgentJson,
        }
    );
}

#[test]
fn session_id_only_is_a_reattach() {
    let target =
        RunTarget::from_parts(None, Some("abc".into()), OutputFormat::Raw).expect("valid");
    assert_eq!(target, RunTarget::Existing("abc".into()));
}

#[test]
fn both_fields_are_rejected() {
    let err = RunTarget::from_parts(Some("ls".into()), Some("abc".into()), OutputFormat::Raw)
        .expect_err("must fail");
    assert!(matches!(err, AppError::Validation(_)));
}

#[test]
fn neither_field_is_rejected() {
    let err = RunTarget::from_parts(None, None, OutputFormat::Raw).expect_err("must fail");
    assert!(matches!(err, AppError::Validation(_)));
}

#[test]
fn blank_values_are_rejected() {
    for (command, session_id) in [
        (Some("   ".to_owned()), None),
        (Some(String::new()), None),
        (None, Some("\t".to_owned())),
    ] {
        let err =
            RunTarget::from_parts(command, session_id, OutputFormat::Raw).expect_err("must fail");
        assert!(matches!(err, AppError::Validation(_)));
    }
}
