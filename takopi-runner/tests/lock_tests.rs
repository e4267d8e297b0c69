// ABOUTME: Session lock discipline tests - serialization, concurrency, and cleanup.
// ABOUTME: Observes run interleaving through start/finish markers written by fake agents.

use std::fs;
use std::path::Path;
use std::time::Duration;

use futures::StreamExt;
use takopi_runner::runners::claude::ClaudeRunner;
use takopi_runner::testing::FakeAgent;
use takopi_runner::{EngineId, EventStream, ResumeToken, Runner, SessionLocks, TakopiEvent};

fn claude_for(script: &Path) -> ClaudeRunner {
    ClaudeRunner {
        claude_cmd: script.to_string_lossy().into_owned(),
        ..ClaudeRunner::default()
    }
}

fn init_line(session: &str) -> String {
    format!(r#"{{"type":"system","subtype":"init","session_id":"{session}"}}"#)
}

fn result_line(session: &str) -> String {
    format!(r#"{{"type":"result","is_error":false,"result":"ok","session_id":"{session}"}}"#)
}

fn marker(path: &Path) -> String {
    fs::read_to_string(path)
        .unwrap_or_default()
        .split_whitespace()
        .collect()
}

async fn drain(mut stream: EventStream) {
    while stream.next().await.is_some() {}
}

#[test]
fn test_registry_returns_same_mutex_for_equal_tokens() {
    let locks = SessionLocks::new();
    let token_a = ResumeToken::new(EngineId::Claude, "registry-a");
    let token_b = ResumeToken::new(EngineId::Claude, "registry-b");
    let other_engine = ResumeToken::new(EngineId::Codex, "registry-a");

    assert!(std::sync::Arc::ptr_eq(
        &locks.lock_for(&token_a),
        &locks.lock_for(&token_a)
    ));
    assert!(!std::sync::Arc::ptr_eq(
        &locks.lock_for(&token_a),
        &locks.lock_for(&token_b)
    ));
    // tokens differ when only the engine differs
    assert!(!std::sync::Arc::ptr_eq(
        &locks.lock_for(&token_a),
        &locks.lock_for(&other_engine)
    ));
}

#[tokio::test]
async fn test_same_token_runs_are_serialized() {
    let dir = tempfile::tempdir().unwrap();
    let gate = dir.path().join("gate");
    let marker_file = dir.path().join("marker");
    let script = dir.path().join("claude");
    FakeAgent::new()
        .mark_to(&marker_file)
        .line(init_line("lock-serial"))
        .gate_on(&gate)
        .line_after_gate(result_line("lock-serial"))
        .write_to(&script)
        .unwrap();

    let runner = claude_for(&script);
    let token = ResumeToken::new(EngineId::Claude, "lock-serial");
    let first = tokio::spawn(drain(runner.run("a", Some(token.clone()))));
    let second = tokio::spawn(drain(runner.run("b", Some(token.clone()))));

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(marker(&marker_file), "S", "second run must wait for the lock");

    fs::write(&gate, "go").unwrap();
    first.await.unwrap();
    second.await.unwrap();
    assert_eq!(marker(&marker_file), "SESE");
}

#[tokio::test]
async fn test_new_sessions_run_concurrently() {
    let dir = tempfile::tempdir().unwrap();
    let gate = dir.path().join("gate");
    let marker_file = dir.path().join("marker");

    let script_a = dir.path().join("claude-a");
    FakeAgent::new()
        .mark_to(&marker_file)
        .line(init_line("conc-a"))
        .gate_on(&gate)
        .line_after_gate(result_line("conc-a"))
        .write_to(&script_a)
        .unwrap();
    let script_b = dir.path().join("claude-b");
    FakeAgent::new()
        .mark_to(&marker_file)
        .line(init_line("conc-b"))
        .gate_on(&gate)
        .line_after_gate(result_line("conc-b"))
        .write_to(&script_b)
        .unwrap();

    let first = tokio::spawn(drain(claude_for(&script_a).run("a", None)));
    let second = tokio::spawn(drain(claude_for(&script_b).run("b", None)));

    // both runs must reach the gate while it is still closed
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while marker(&marker_file) != "SS" {
        assert!(
            tokio::time::Instant::now() < deadline,
            "new sessions did not run concurrently: {:?}",
            marker(&marker_file)
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    fs::write(&gate, "go").unwrap();
    first.await.unwrap();
    second.await.unwrap();
}

#[tokio::test]
async fn test_resumed_run_waits_for_discovered_session() {
    let dir = tempfile::tempdir().unwrap();
    let gate = dir.path().join("gate");
    let resume_marker = dir.path().join("resume-marker");

    let script_new = dir.path().join("claude-new");
    FakeAgent::new()
        .line(init_line("disc-x"))
        .gate_on(&gate)
        .line_after_gate(result_line("disc-x"))
        .write_to(&script_new)
        .unwrap();
    let script_resume = dir.path().join("claude-resume");
    FakeAgent::new()
        .mark_to(&resume_marker)
        .line(init_line("disc-x"))
        .line(result_line("disc-x"))
        .write_to(&script_resume)
        .unwrap();

    // first run discovers its session mid-stream and takes the lock
    let mut stream = claude_for(&script_new).run("hello", None);
    match stream.next().await {
        Some(Ok(TakopiEvent::Started(started))) => {
            assert_eq!(started.resume.value, "disc-x");
        }
        other => panic!("expected started event, got {other:?}"),
    }
    let rest = tokio::spawn(drain(stream));

    let token = ResumeToken::new(EngineId::Claude, "disc-x");
    let resumed = tokio::spawn(drain(claude_for(&script_resume).run("resume", Some(token))));

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(
        marker(&resume_marker),
        "",
        "resumed run must not spawn while the discovered session is held"
    );

    fs::write(&gate, "go").unwrap();
    rest.await.unwrap();
    resumed.await.unwrap();
    assert_eq!(marker(&resume_marker), "SE");
}

#[tokio::test]
async fn test_dropping_a_stream_releases_the_lock() {
    let dir = tempfile::tempdir().unwrap();
    let never_gate = dir.path().join("never");
    let script = dir.path().join("claude");
    FakeAgent::new()
        .line(init_line("drop-x"))
        .gate_on(&never_gate)
        .line_after_gate(result_line("drop-x"))
        .write_to(&script)
        .unwrap();

    let token = ResumeToken::new(EngineId::Claude, "drop-x");
    let mut stream = claude_for(&script).run("a", Some(token.clone()));
    match stream.next().await {
        Some(Ok(TakopiEvent::Started(_))) => {}
        other => panic!("expected started event, got {other:?}"),
    }

    // abandoning the stream mid-run must terminate the child and free the lock
    drop(stream);

    let lock = SessionLocks::global().lock_for(&token);
    let guard = tokio::time::timeout(Duration::from_secs(1), lock.lock())
        .await
        .expect("session lock was not released on drop");
    drop(guard);
}
