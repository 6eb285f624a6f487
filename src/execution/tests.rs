use super::*;
use crate::errors::ExecError;
use std::io::{BufRead, BufReader, Read};
use std::time::{Duration, Instant};

fn sh(script: &str) -> CommandSpec {
    CommandSpec::new("sh").args(["-c", script])
}

#[test]
fn command_success_captures_trimmed_output() {
    let outcome = BasicExecutor::new().run_command(&sh("echo hello; echo oops >&2"));

    assert_eq!(outcome.exit, ExitClass::Success);
    assert!(outcome.error.is_none());
    assert_eq!(outcome.stdout, "hello");
    assert_eq!(outcome.stderr, "oops");
}

#[test]
fn command_output_is_collapsed_onto_one_line() {
    let outcome = BasicExecutor::new().run_command(&sh("printf 'a\\tb\\r\\nc\\n'"));

    assert_eq!(outcome.stdout, "a b c");
}

#[test]
fn command_nonzero_exit_is_classified_with_code() {
    let outcome = BasicExecutor::new().run_command(&sh("echo 'bad\tthing' >&2; exit 3"));

    assert_eq!(outcome.exit, ExitClass::NonZeroExit(3));
    match outcome.error {
        Some(ExecError::NonZeroExit { code, ref stderr, .. }) => {
            assert_eq!(code, 3);
            assert_eq!(stderr, "bad thing");
        }
        ref other => panic!("unexpected error: {:?}", other),
    }
}

#[test]
fn command_killed_by_signal_uses_default_code() {
    let outcome = BasicExecutor::new().run_command(&sh("kill -9 $$"));

    assert_eq!(outcome.exit, ExitClass::NonZeroExit(1));
    assert!(outcome.error.is_some());
}

#[test]
fn command_missing_program_is_launch_failure() {
    let outcome =
        BasicExecutor::new().run_command(&CommandSpec::new("/nonexistent/kmod-installer-test"));

    assert_eq!(outcome.exit, ExitClass::LaunchFailure);
    assert!(!outcome.is_success());
    assert!(matches!(outcome.error, Some(ExecError::Launch { .. })));
}

#[test]
fn command_deadline_classifies_timeout() {
    let start = Instant::now();
    let outcome =
        BasicExecutor::new().run_command(&CommandSpec::new("sleep").arg("5").timeout(1));

    assert_eq!(outcome.exit, ExitClass::Timeout);
    assert!(start.elapsed() < Duration::from_secs(4));
    let text = outcome.error.expect("timeout error").to_string();
    assert!(text.contains("sleep"));
    assert!(text.contains("\"5\""));
    assert!(text.contains("1 seconds"));
}

#[test]
fn command_deadline_covers_forked_children() {
    let start = Instant::now();
    let outcome = BasicExecutor::new().run_command(&sh("sleep 6; echo late").timeout(1));

    assert_eq!(outcome.exit, ExitClass::Timeout);
    assert!(start.elapsed() < Duration::from_secs(3));
    assert!(!outcome.stdout.contains("late"));
}

#[test]
fn command_error_text_never_spans_lines() {
    let outcome = BasicExecutor::new().run_command(&sh("printf 'one\\ntwo\\r\\n\\tthree' >&2; exit 2"));

    let text = outcome.diagnostic();
    assert!(!text.contains(['\t', '\n', '\r']));
    assert!(text.contains("one two three"));
}

#[test]
fn daemon_streams_output_before_cancel() {
    let cancel = CancelToken::new();
    let mut handle = BasicExecutor::new().run_daemon(&sh("echo ready; exec sleep 30"), &cancel);

    let stdout = handle.stdout.clone().expect("stdout pipe");
    let mut line = String::new();
    BufReader::new(stdout).read_line(&mut line).unwrap();
    assert_eq!(line.trim_end(), "ready");

    assert!(handle.is_running());
    cancel.cancel();
    handle.join();
    assert!(handle.drain_errors().is_empty());
}

#[test]
fn daemon_cancel_kills_and_closes_pipes() {
    let cancel = CancelToken::new();
    let executor = BasicExecutor::new().with_grace_period(Duration::from_millis(50));
    let mut handle = executor.run_daemon(&CommandSpec::new("sleep").arg("30"), &cancel);

    let start = Instant::now();
    cancel.cancel();
    handle.join();

    assert!(start.elapsed() < Duration::from_secs(10));
    assert!(handle.stdout.as_ref().unwrap().is_closed());
    assert!(handle.stderr.as_ref().unwrap().is_closed());
    assert!(handle.drain_errors().is_empty());

    let mut buf = [0u8; 8];
    let mut stdout = handle.stdout.take().unwrap();
    assert_eq!(stdout.read(&mut buf).unwrap(), 0);
}

#[test]
fn daemon_cancel_releases_blocked_reader() {
    let cancel = CancelToken::new();
    let executor = BasicExecutor::new().with_grace_period(Duration::from_millis(50));
    let mut handle = executor.run_daemon(&sh("sleep 6; echo done"), &cancel);

    let mut stdout = handle.stdout.clone().expect("stdout pipe");
    let reader = std::thread::spawn(move || {
        let mut out = String::new();
        stdout.read_to_string(&mut out).map(|_| out)
    });
    std::thread::sleep(Duration::from_millis(100));

    let start = Instant::now();
    cancel.cancel();
    handle.join();
    let out = reader.join().unwrap().unwrap();

    assert!(start.elapsed() < Duration::from_secs(3));
    assert!(!out.contains("done"));
    assert!(handle.stdout.as_ref().unwrap().is_closed());
}

#[test]
fn daemon_exiting_during_grace_period_is_not_killed() {
    let cancel = CancelToken::new();
    let executor = BasicExecutor::new().with_grace_period(Duration::from_secs(5));
    let mut handle = executor.run_daemon(&sh("exit 0"), &cancel);

    cancel.cancel();
    handle.join();

    assert!(handle.drain_errors().is_empty());
    assert!(!handle.stdout.as_ref().unwrap().is_closed());
}

#[test]
fn daemon_launch_failure_is_reported_synchronously() {
    let cancel = CancelToken::new();
    let handle = BasicExecutor::new()
        .run_daemon(&CommandSpec::new("/nonexistent/kmod-installer-daemon"), &cancel);

    assert!(handle.stdout.is_none());
    assert!(handle.stderr.is_none());
    assert!(!handle.is_running());
    let errors = handle.drain_errors();
    assert_eq!(errors.len(), 1);
    assert!(matches!(errors[0], ExecError::Launch { .. }));
}
