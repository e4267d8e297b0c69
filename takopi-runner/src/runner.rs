// ABOUTME: Runner and Translator abstractions plus the shared run driver.
// ABOUTME: Drives one subprocess per turn and enforces the session lock discipline.

use std::io;

use async_stream::try_stream;
use futures::stream::BoxStream;
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::OwnedMutexGuard;

use crate::locks::SessionLocks;
use crate::model::{
    Action, ActionEvent, ActionKind, ActionLevel, ActionPhase, CompletedEvent, EngineId,
    ResumeToken, StartedEvent, TakopiEvent,
};
use crate::transport::{CommandSpec, Subprocess};

/// Ordered event sequence produced by one run.
///
/// Operational failures end the stream with a failing [`CompletedEvent`];
/// only protocol-contract violations surface as `Err`. Dropping the stream
/// early terminates the subprocess and releases the session lock.
pub type EventStream = BoxStream<'static, Result<TakopiEvent, RunnerError>>;

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("agent subprocess i/o failed: {0}")]
    Io(#[from] io::Error),

    /// The backend revealed a session token for a different engine.
    /// A translator bug, not an operational failure.
    #[error("{engine} emitted a session token for engine {got}")]
    EngineMismatch { engine: EngineId, got: EngineId },

    /// The backend revealed a session identity differing from the resume
    /// token the caller supplied. Never downgraded to a warning: the run
    /// would be talking to the wrong conversation under the wrong lock.
    #[error("{engine} emitted a different session id than expected")]
    SessionMismatch { engine: EngineId },

    /// A resume token for another engine was passed to this runner.
    #[error("resume token is for engine {got}, not {engine}")]
    ForeignToken { engine: EngineId, got: EngineId },
}

/// Per-vendor translation from native stream events to the shared vocabulary.
///
/// One translator is allocated per run and owns all per-run state (pending
/// actions, last seen free text). Unknown shapes must be ignored, never
/// failed: vendors add event types without notice.
pub trait Translator: Send {
    fn engine(&self) -> EngineId;

    /// Program label used in synthesized failure messages, e.g. "claude"
    /// or "codex exec".
    fn label(&self) -> &'static str;

    /// What the vendor calls its session identity, for the no-session error.
    fn session_noun(&self) -> &'static str;

    /// Translate one decoded stream event into zero or more shared events.
    fn translate(&mut self, event: &Value) -> Vec<TakopiEvent>;

    /// Allocate the next synthetic note-action id for this run.
    fn next_note_id(&mut self) -> String;

    /// Last free-text fragment seen, used as the answer when the stream
    /// ends without a terminal record.
    fn fallback_answer(&self) -> Option<&str>;
}

/// One engine backend: resume-token syntax plus turn execution.
pub trait Runner: Send + Sync + std::fmt::Debug {
    fn engine(&self) -> EngineId;

    /// Render `token` as this engine's copy-pasteable resume instruction.
    fn format_resume(&self, token: &ResumeToken) -> Result<String, RunnerError>;

    /// Find this engine's resume instruction inside arbitrary text.
    fn extract_resume(&self, text: &str) -> Option<ResumeToken>;

    /// Execute one turn against the backend. The stream carries at most
    /// one `StartedEvent` and exactly one terminal `CompletedEvent`,
    /// always last.
    fn run(&self, prompt: &str, resume: Option<ResumeToken>) -> EventStream;
}

fn validate_started(
    engine: EngineId,
    expected: Option<&ResumeToken>,
    started: &StartedEvent,
) -> Result<(), RunnerError> {
    if started.resume.engine != engine {
        return Err(RunnerError::EngineMismatch {
            engine,
            got: started.resume.engine,
        });
    }
    if let Some(expected) = expected {
        if started.resume != *expected {
            return Err(RunnerError::SessionMismatch { engine });
        }
    }
    Ok(())
}

fn warning_note(engine: EngineId, id: String, message: &str, detail: Map<String, Value>) -> TakopiEvent {
    TakopiEvent::Action(ActionEvent {
        engine,
        action: Action {
            id,
            kind: ActionKind::Warning,
            title: message.to_string(),
            detail,
        },
        phase: ActionPhase::Completed,
        ok: Some(false),
        message: Some(message.to_string()),
        level: Some(ActionLevel::Warning),
    })
}

/// Drive one run end to end: spawn the subprocess, stream and translate
/// its output, enforce the session lock discipline, and synthesize the
/// terminal event on every abnormal exit path.
///
/// Lock discipline: a supplied resume token is locked before the process
/// is even spawned; a fresh conversation takes the lock at the moment the
/// backend reveals its identity. The guard lives inside the stream, so
/// release happens exactly once, on any exit, including early drop.
pub(crate) fn drive<T>(
    spec: CommandSpec,
    mut translator: T,
    resume: Option<ResumeToken>,
    locks: &'static SessionLocks,
) -> EventStream
where
    T: Translator + 'static,
{
    let stream = try_stream! {
        let engine = translator.engine();
        let expected = resume;
        let mut _guard: Option<OwnedMutexGuard<()>> = None;
        if let Some(token) = &expected {
            _guard = Some(locks.lock_for(token).lock_owned().await);
        }

        let program = spec.program.clone();
        let mut proc = Subprocess::spawn(spec, translator.label())
            .await
            .map_err(|source| RunnerError::Spawn { program, source })?;

        let mut found: Option<ResumeToken> = None;
        let mut completed = false;

        while let Some(line) = proc.next_json().await {
            if completed {
                // nothing after the terminal event is forwarded; keep
                // draining so the child is not stalled on a full pipe
                continue;
            }
            let value = match line.data {
                Some(value) => value,
                None => {
                    let message =
                        format!("invalid JSON from {}; ignoring line", translator.label());
                    let mut detail = Map::new();
                    detail.insert("line".to_string(), Value::String(line.raw));
                    yield warning_note(engine, translator.next_note_id(), &message, detail);
                    continue;
                }
            };

            for event in translator.translate(&value) {
                match event {
                    TakopiEvent::Started(started) => {
                        if found.is_some() {
                            continue;
                        }
                        validate_started(engine, expected.as_ref(), &started)?;
                        if expected.is_none() {
                            _guard = Some(locks.lock_for(&started.resume).lock_owned().await);
                        }
                        found = Some(started.resume.clone());
                        yield TakopiEvent::Started(started);
                    }
                    TakopiEvent::Completed(mut done) => {
                        if done.resume.is_none() {
                            done.resume = found.clone().or_else(|| expected.clone());
                        }
                        yield TakopiEvent::Completed(done);
                        completed = true;
                        break;
                    }
                    other => {
                        yield other;
                    }
                }
            }
        }

        let rc = proc.wait().await?;
        if completed {
            return;
        }

        if rc != Some(0) {
            let rc_text = rc.map_or_else(|| "signal".to_string(), |code| code.to_string());
            let message = format!("{} failed (rc={rc_text}).", translator.label());
            let mut detail = Map::new();
            detail.insert("stderr_tail".to_string(), Value::String(proc.stderr_tail()));
            yield warning_note(engine, translator.next_note_id(), &message, detail);
            yield TakopiEvent::Completed(CompletedEvent {
                engine,
                ok: false,
                answer: String::new(),
                resume: found.or(expected),
                error: Some(message),
                usage: None,
            });
            return;
        }

        if found.is_none() {
            let message = format!(
                "{} finished but no {} was captured",
                translator.label(),
                translator.session_noun()
            );
            yield TakopiEvent::Completed(CompletedEvent {
                engine,
                ok: false,
                answer: String::new(),
                resume: expected,
                error: Some(message),
                usage: None,
            });
            return;
        }

        let message = format!("{} finished without a result event", translator.label());
        yield TakopiEvent::Completed(CompletedEvent {
            engine,
            ok: false,
            answer: translator.fallback_answer().unwrap_or_default().to_string(),
            resume: found,
            error: Some(message),
            usage: None,
        });
    };
    Box::pin(stream)
}
