#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::time::Duration;

use intent_api_server::services::action_runner::{ActionError, ActionRunner};
use intent_api_server::services::ProcessActionRunner;

fn write_script(dir: &Path, name: &str, body: &str) {
    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
}

#[tokio::test]
async fn test_runs_executable_and_parses_stdout() {
    let dir = tempfile::tempdir().unwrap();
    write_script(
        dir.path(),
        "mensaje",
        r#"echo '{"message":"Message sent","status":"success"}'"#,
    );

    let runner = ProcessActionRunner::with_directory(dir.path());
    let output = runner.run_action("mensaje").await.unwrap();

    assert_eq!(output.message, "Message sent");
    assert_eq!(output.status, "success");
}

#[tokio::test]
async fn test_non_zero_exit_carries_stderr_and_stdout() {
    let dir = tempfile::tempdir().unwrap();
    write_script(
        dir.path(),
        "llamada",
        "echo 'dialing 555'\necho 'no line available' >&2\nexit 3",
    );

    let runner = ProcessActionRunner::with_directory(dir.path());
    let err = runner.run_action("llamada").await.unwrap_err();

    match err {
        ActionError::NonZeroExit {
            code,
            stderr,
            stdout,
        } => {
            assert_eq!(code, Some(3));
            assert!(stderr.contains("no line available"));
            assert!(stdout.contains("dialing 555"));
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_invalid_stdout_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    write_script(dir.path(), "correo", "echo 'sent!'");

    let runner = ProcessActionRunner::with_directory(dir.path());
    let err = runner.run_action("correo").await.unwrap_err();

    assert!(matches!(err, ActionError::InvalidOutput { ref stdout, .. } if stdout.contains("sent!")));
}

#[tokio::test]
async fn test_slow_action_times_out() {
    let dir = tempfile::tempdir().unwrap();
    write_script(dir.path(), "llamada", "sleep 5");

    let runner =
        ProcessActionRunner::with_directory(dir.path()).with_timeout(Duration::from_millis(200));
    let err = runner.run_action("llamada").await.unwrap_err();

    assert!(matches!(err, ActionError::Timeout(_)));
}
