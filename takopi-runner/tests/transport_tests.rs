// ABOUTME: Integration tests for the subprocess transport.
// ABOUTME: Uses fake agent scripts to exercise JSONL decoding, stderr tails, and exits.

use std::fs;
use std::path::Path;

use takopi_runner::testing::FakeAgent;
use takopi_runner::transport::{CommandSpec, Subprocess, STDERR_TAIL_LINES};

fn write_script(path: &Path, body: &str) {
    fs::write(path, format!("#!/bin/sh\n{body}")).unwrap();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
    }
}

#[tokio::test]
async fn test_decodes_json_lines_and_flags_garbage() {
    let dir = tempfile::tempdir().unwrap();
    let script = dir.path().join("agent");
    FakeAgent::new()
        .line(r#"{"type":"hello","n":1}"#)
        .line("this is not json")
        .line(r#"{"type":"bye"}"#)
        .write_to(&script)
        .unwrap();

    let spec = CommandSpec::new(script.to_string_lossy(), vec![]);
    let mut proc = Subprocess::spawn(spec, "test").await.unwrap();

    let first = proc.next_json().await.unwrap();
    assert_eq!(first.data.unwrap()["type"], "hello");

    let second = proc.next_json().await.unwrap();
    assert!(second.data.is_none());
    assert_eq!(second.raw, "this is not json");

    let third = proc.next_json().await.unwrap();
    assert_eq!(third.data.unwrap()["type"], "bye");

    assert!(proc.next_json().await.is_none());
    assert_eq!(proc.wait().await.unwrap(), Some(0));
}

#[tokio::test]
async fn test_blank_lines_are_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let script = dir.path().join("agent");
    write_script(&script, "echo\necho '{\"ok\":true}'\necho\n");

    let spec = CommandSpec::new(script.to_string_lossy(), vec![]);
    let mut proc = Subprocess::spawn(spec, "test").await.unwrap();

    let line = proc.next_json().await.unwrap();
    assert_eq!(line.data.unwrap()["ok"], true);
    assert!(proc.next_json().await.is_none());
}

#[tokio::test]
async fn test_exit_code_is_reported_after_stream_end() {
    let dir = tempfile::tempdir().unwrap();
    let script = dir.path().join("agent");
    FakeAgent::new().exit_code(7).write_to(&script).unwrap();

    let spec = CommandSpec::new(script.to_string_lossy(), vec![]);
    let mut proc = Subprocess::spawn(spec, "test").await.unwrap();

    assert!(proc.next_json().await.is_none());
    assert_eq!(proc.wait().await.unwrap(), Some(7));
}

#[tokio::test]
async fn test_stderr_tail_is_bounded() {
    let dir = tempfile::tempdir().unwrap();
    let script = dir.path().join("agent");
    let mut agent = FakeAgent::new();
    for n in 0..STDERR_TAIL_LINES + 10 {
        agent = agent.stderr_line(format!("stderr line {n}"));
    }
    agent.write_to(&script).unwrap();

    let spec = CommandSpec::new(script.to_string_lossy(), vec![]);
    let mut proc = Subprocess::spawn(spec, "test").await.unwrap();

    while proc.next_json().await.is_some() {}
    proc.wait().await.unwrap();

    let tail = proc.stderr_tail();
    let lines: Vec<&str> = tail.lines().collect();
    assert_eq!(lines.len(), STDERR_TAIL_LINES);
    assert_eq!(lines[0], "stderr line 10");
    assert_eq!(*lines.last().unwrap(), format!("stderr line {}", STDERR_TAIL_LINES + 9));
}

#[tokio::test]
async fn test_stdin_bytes_are_delivered_then_closed() {
    let dir = tempfile::tempdir().unwrap();
    let script = dir.path().join("agent");
    write_script(&script, "cat\n");

    let spec = CommandSpec::new(script.to_string_lossy(), vec![])
        .stdin(br#"{"prompt":"hello"}"#.to_vec());
    let mut proc = Subprocess::spawn(spec, "test").await.unwrap();

    let line = proc.next_json().await.unwrap();
    assert_eq!(line.data.unwrap()["prompt"], "hello");
    assert!(proc.next_json().await.is_none());
    assert_eq!(proc.wait().await.unwrap(), Some(0));
}

#[tokio::test]
async fn test_env_remove_scrubs_variables() {
    std::env::set_var("TAKOPI_TEST_SECRET", "super-secret");

    let dir = tempfile::tempdir().unwrap();
    let script = dir.path().join("agent");
    write_script(
        &script,
        "printf '{\"secret\":\"%s\"}\\n' \"${TAKOPI_TEST_SECRET:-unset}\"\n",
    );

    let spec = CommandSpec::new(script.to_string_lossy(), vec![]);
    let mut proc = Subprocess::spawn(spec, "test").await.unwrap();
    let line = proc.next_json().await.unwrap();
    assert_eq!(line.data.unwrap()["secret"], "super-secret");
    proc.wait().await.unwrap();

    let spec = CommandSpec::new(script.to_string_lossy(), vec![])
        .env_remove("TAKOPI_TEST_SECRET");
    let mut proc = Subprocess::spawn(spec, "test").await.unwrap();
    let line = proc.next_json().await.unwrap();
    assert_eq!(line.data.unwrap()["secret"], "unset");
    proc.wait().await.unwrap();
}
