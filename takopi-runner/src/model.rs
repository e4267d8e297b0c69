// ABOUTME: Shared event vocabulary produced by every engine backend.
// ABOUTME: ResumeToken doubles as the session lock key across the process.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Identifier for a wired-in engine backend.
///
/// The set is fixed at build time; adding an engine means adding a variant
/// next to its runner module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineId {
    Claude,
    Codex,
}

impl EngineId {
    pub fn as_str(self) -> &'static str {
        match self {
            EngineId::Claude => "claude",
            EngineId::Codex => "codex",
        }
    }
}

impl fmt::Display for EngineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a resumable conversation with one engine.
///
/// Equal tokens name the same conversation; the value is opaque to the
/// core and only round-tripped into engine-specific resume syntax.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResumeToken {
    pub engine: EngineId,
    pub value: String,
}

impl ResumeToken {
    pub fn new(engine: EngineId, value: impl Into<String>) -> Self {
        Self {
            engine,
            value: value.into(),
        }
    }
}

/// Classification of one unit of backend-performed work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Command,
    Tool,
    FileChange,
    WebSearch,
    Note,
    Warning,
    Turn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionPhase {
    Started,
    Updated,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionLevel {
    Debug,
    Info,
    Warning,
    Error,
}

/// One discrete unit of backend work, tracked across started/updated/completed.
///
/// `id` is assigned by the backend and stays stable across phases of the
/// same logical action. `detail` is backend-specific and forwarded verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub id: String,
    pub kind: ActionKind,
    pub title: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub detail: Map<String, Value>,
}

/// Emitted exactly once per run, as soon as the backend reveals its
/// session identity. A run that never produced this never had a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartedEvent {
    pub engine: EngineId,
    pub resume: ResumeToken,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Map<String, Value>>,
}

/// Progress on one action. `ok`/`message`/`level` only carry meaning on
/// completed phases and terminal notes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionEvent {
    pub engine: EngineId,
    pub action: Action,
    pub phase: ActionPhase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ok: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<ActionLevel>,
}

/// Terminal event, exactly one per run, always last.
///
/// `resume` is the most specific session identity known at stream end:
/// the one a `StartedEvent` revealed, else the token the caller supplied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedEvent {
    pub engine: EngineId,
    pub ok: bool,
    pub answer: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume: Option<ResumeToken>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Map<String, Value>>,
}

/// Event vocabulary shared by every backend and consumer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TakopiEvent {
    Started(StartedEvent),
    Action(ActionEvent),
    Completed(CompletedEvent),
}

impl TakopiEvent {
    pub fn engine(&self) -> EngineId {
        match self {
            TakopiEvent::Started(event) => event.engine,
            TakopiEvent::Action(event) => event.engine,
            TakopiEvent::Completed(event) => event.engine,
        }
    }
}
