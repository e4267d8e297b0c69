// ABOUTME: Codex backend - spawns `codex exec --json` with the prompt on stdin.
// ABOUTME: Translates the thread/turn/item stream into shared events.

use serde_json::{Map, Value};

use crate::locks::SessionLocks;
use crate::model::{
    Action, ActionEvent, ActionKind, ActionLevel, ActionPhase, CompletedEvent, EngineId,
    ResumeToken, StartedEvent, TakopiEvent,
};
use crate::paths::relativize_command;
use crate::resume::ResumeSyntax;
use crate::runner::{drive, EventStream, Runner, RunnerError, Translator};
use crate::transport::CommandSpec;

pub const ENGINE: EngineId = EngineId::Codex;

static RESUME: ResumeSyntax = ResumeSyntax::new(ENGINE, "codex", "resume", None);

/// Per-run translation state for the codex exec stream.
#[derive(Debug, Default)]
pub struct CodexTranslator {
    session_title: String,
    final_answer: Option<String>,
    turn_index: u32,
    note_seq: u32,
}

impl CodexTranslator {
    pub fn new(session_title: impl Into<String>) -> Self {
        Self {
            session_title: session_title.into(),
            ..Self::default()
        }
    }

    fn note_id(&mut self) -> String {
        self.note_seq += 1;
        format!("codex.note.{}", self.note_seq)
    }

    fn completed(&self, ok: bool, error: Option<String>, usage: Option<Map<String, Value>>) -> TakopiEvent {
        TakopiEvent::Completed(CompletedEvent {
            engine: ENGINE,
            ok,
            answer: self.final_answer.clone().unwrap_or_default(),
            resume: None,
            error,
            usage,
        })
    }

    fn on_thread_started(&mut self, event: &Value) -> Vec<TakopiEvent> {
        let Some(thread_id) = event
            .get("thread_id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
        else {
            tracing::debug!(?event, "[codex] thread.started missing thread_id");
            return Vec::new();
        };
        vec![TakopiEvent::Started(StartedEvent {
            engine: ENGINE,
            resume: ResumeToken::new(ENGINE, thread_id),
            title: self.session_title.clone(),
            meta: None,
        })]
    }

    fn on_error(&mut self, event: &Value) -> Vec<TakopiEvent> {
        let message = event
            .get("message")
            .and_then(Value::as_str)
            .filter(|msg| !msg.is_empty())
            .unwrap_or("codex error")
            .to_string();
        // an absent fatal flag means fatal
        let fatal = event.get("fatal").and_then(Value::as_bool).unwrap_or(true);
        if fatal {
            return vec![self.completed(false, Some(message), None)];
        }
        let mut detail = Map::new();
        detail.insert("code".to_string(), event.get("code").cloned().unwrap_or(Value::Null));
        detail.insert("fatal".to_string(), event.get("fatal").cloned().unwrap_or(Value::Null));
        let id = self.note_id();
        vec![warning_note(id, &message, detail)]
    }

    fn on_turn_started(&mut self) -> Vec<TakopiEvent> {
        let action_id = format!("turn_{}", self.turn_index);
        self.turn_index += 1;
        vec![TakopiEvent::Action(ActionEvent {
            engine: ENGINE,
            action: Action {
                id: action_id,
                kind: ActionKind::Turn,
                title: "turn started".to_string(),
                detail: Map::new(),
            },
            phase: ActionPhase::Started,
            ok: None,
            message: None,
            level: None,
        })]
    }

    fn on_rate_limited(&mut self, event: &Value) -> Vec<TakopiEvent> {
        let message = match event.get("retry_after_ms").and_then(Value::as_i64) {
            Some(ms) => format!("rate limited (retry after {ms}ms)"),
            None => "rate limited".to_string(),
        };
        let id = self.note_id();
        vec![warning_note(id, &message, Map::new())]
    }

    fn on_item(&mut self, etype: &str, event: &Value) -> Vec<TakopiEvent> {
        let Some(item) = event.get("item").and_then(Value::as_object) else {
            return Vec::new();
        };
        let item_type = item
            .get("type")
            .or_else(|| item.get("item_type"))
            .and_then(Value::as_str);
        let item_type = match item_type {
            Some("assistant_message") => Some("agent_message"),
            other => other,
        };
        let Some(item_type) = item_type else {
            return Vec::new();
        };

        if item_type == "agent_message" {
            if etype == "item.completed" {
                if let Some(text) = item.get("text").and_then(Value::as_str) {
                    if self.final_answer.is_some() {
                        tracing::debug!("[codex] multiple agent messages; keeping the last one");
                    }
                    self.final_answer = Some(text.to_string());
                }
            }
            return Vec::new();
        }

        let Some(action_id) = item
            .get("id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
        else {
            tracing::debug!(?item, "[codex] item event missing id");
            return Vec::new();
        };
        let phase = match etype {
            "item.started" => ActionPhase::Started,
            "item.updated" => ActionPhase::Updated,
            _ => ActionPhase::Completed,
        };
        translate_item(item_type, phase, action_id, item)
    }
}

impl Translator for CodexTranslator {
    fn engine(&self) -> EngineId {
        ENGINE
    }

    fn label(&self) -> &'static str {
        "codex exec"
    }

    fn session_noun(&self) -> &'static str {
        "session_id/thread_id"
    }

    fn translate(&mut self, event: &Value) -> Vec<TakopiEvent> {
        match event.get("type").and_then(Value::as_str) {
            Some("thread.started") => self.on_thread_started(event),
            Some("error") => self.on_error(event),
            Some("turn.started") => self.on_turn_started(),
            Some("turn.completed") => {
                let usage = event.get("usage").and_then(Value::as_object).cloned();
                vec![self.completed(true, None, usage)]
            }
            Some("turn.failed") => {
                let message = event
                    .get("error")
                    .and_then(|error| error.get("message"))
                    .and_then(Value::as_str)
                    .filter(|msg| !msg.is_empty())
                    .unwrap_or("codex turn failed")
                    .to_string();
                vec![self.completed(false, Some(message), None)]
            }
            Some("turn.rate_limited") => self.on_rate_limited(event),
            Some(etype @ ("item.started" | "item.updated" | "item.completed")) => {
                self.on_item(etype, event)
            }
            _ => Vec::new(),
        }
    }

    fn next_note_id(&mut self) -> String {
        self.note_id()
    }

    fn fallback_answer(&self) -> Option<&str> {
        self.final_answer.as_deref()
    }
}

fn warning_note(id: String, message: &str, detail: Map<String, Value>) -> TakopiEvent {
    TakopiEvent::Action(ActionEvent {
        engine: ENGINE,
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

fn action(phase: ActionPhase, action: Action, ok: Option<bool>) -> TakopiEvent {
    TakopiEvent::Action(ActionEvent {
        engine: ENGINE,
        action,
        phase,
        ok,
        message: None,
        level: None,
    })
}

fn short_tool_name(item: &Map<String, Value>) -> String {
    let parts: Vec<&str> = ["server", "tool"]
        .into_iter()
        .filter_map(|key| item.get(key).and_then(Value::as_str))
        .filter(|part| !part.is_empty())
        .collect();
    if parts.is_empty() {
        "tool".to_string()
    } else {
        parts.join(".")
    }
}

fn summarize_tool_result(result: Option<&Value>) -> Option<Map<String, Value>> {
    let result = result?.as_object()?;
    let mut summary = Map::new();
    match result.get("content") {
        Some(Value::Array(items)) => {
            summary.insert("content_blocks".to_string(), Value::from(items.len()));
        }
        Some(value) if !value.is_null() => {
            summary.insert("content_blocks".to_string(), Value::from(1));
        }
        _ => {}
    }
    if result.contains_key("structured_content") || result.contains_key("structured") {
        let structured = result
            .get("structured_content")
            .or_else(|| result.get("structured"));
        summary.insert(
            "has_structured".to_string(),
            Value::Bool(structured.is_some_and(|value| !value.is_null())),
        );
    }
    (!summary.is_empty()).then_some(summary)
}

fn format_change_summary(item: &Map<String, Value>) -> String {
    let empty = Vec::new();
    let changes = item
        .get("changes")
        .and_then(Value::as_array)
        .unwrap_or(&empty);
    let paths: Vec<&str> = changes
        .iter()
        .filter_map(|change| change.get("path").and_then(Value::as_str))
        .filter(|path| !path.is_empty())
        .collect();
    if paths.is_empty() {
        if changes.is_empty() {
            "files".to_string()
        } else {
            format!("{} files", changes.len())
        }
    } else {
        paths.join(", ")
    }
}

#[derive(Debug, Default)]
struct TodoSummary {
    done: usize,
    total: usize,
    next_text: Option<String>,
}

fn summarize_todo_list(items: Option<&Value>) -> TodoSummary {
    let mut summary = TodoSummary::default();
    let Some(items) = items.and_then(Value::as_array) else {
        return summary;
    };
    for item in items {
        let Some(map) = item.as_object() else {
            continue;
        };
        summary.total += 1;
        if map.get("completed").and_then(Value::as_bool) == Some(true) {
            summary.done += 1;
        } else if summary.next_text.is_none() {
            summary.next_text = map.get("text").and_then(Value::as_str).map(str::to_string);
        }
    }
    summary
}

fn todo_title(summary: &TodoSummary) -> String {
    if summary.total == 0 {
        return "todo".to_string();
    }
    match &summary.next_text {
        Some(next) => format!("todo {}/{}: {next}", summary.done, summary.total),
        None => format!("todo {}/{}: done", summary.done, summary.total),
    }
}

fn translate_item(
    item_type: &str,
    phase: ActionPhase,
    action_id: &str,
    item: &Map<String, Value>,
) -> Vec<TakopiEvent> {
    match item_type {
        "error" => {
            if phase != ActionPhase::Completed {
                return Vec::new();
            }
            let message = item
                .get("message")
                .and_then(Value::as_str)
                .filter(|msg| !msg.is_empty())
                .unwrap_or("codex item error")
                .to_string();
            let mut detail = Map::new();
            detail.insert("message".to_string(), Value::String(message.clone()));
            vec![TakopiEvent::Action(ActionEvent {
                engine: ENGINE,
                action: Action {
                    id: action_id.to_string(),
                    kind: ActionKind::Warning,
                    title: message.clone(),
                    detail,
                },
                phase: ActionPhase::Completed,
                ok: Some(false),
                message: Some(message),
                level: Some(ActionLevel::Warning),
            })]
        }

        "command_execution" => {
            let title =
                relativize_command(item.get("command").and_then(Value::as_str).unwrap_or(""));
            match phase {
                ActionPhase::Started | ActionPhase::Updated => vec![action(
                    phase,
                    Action {
                        id: action_id.to_string(),
                        kind: ActionKind::Command,
                        title,
                        detail: Map::new(),
                    },
                    None,
                )],
                ActionPhase::Completed => {
                    let exit_code = item.get("exit_code").and_then(Value::as_i64);
                    let mut ok = item.get("status").and_then(Value::as_str) != Some("failed");
                    if let Some(code) = exit_code {
                        ok = ok && code == 0;
                    }
                    let mut detail = Map::new();
                    detail.insert(
                        "exit_code".to_string(),
                        item.get("exit_code").cloned().unwrap_or(Value::Null),
                    );
                    detail.insert(
                        "status".to_string(),
                        item.get("status").cloned().unwrap_or(Value::Null),
                    );
                    vec![action(
                        ActionPhase::Completed,
                        Action {
                            id: action_id.to_string(),
                            kind: ActionKind::Command,
                            title,
                            detail,
                        },
                        Some(ok),
                    )]
                }
            }
        }

        "mcp_tool_call" | "tool_call" => {
            let (title, mut detail) = if item_type == "tool_call" {
                let mut detail = Map::new();
                detail.insert("name".to_string(), item.get("name").cloned().unwrap_or(Value::Null));
                detail.insert(
                    "status".to_string(),
                    item.get("status").cloned().unwrap_or(Value::Null),
                );
                let title = item
                    .get("name")
                    .and_then(Value::as_str)
                    .filter(|name| !name.is_empty())
                    .unwrap_or("tool")
                    .to_string();
                (title, detail)
            } else {
                let mut detail = Map::new();
                detail.insert(
                    "server".to_string(),
                    item.get("server").cloned().unwrap_or(Value::Null),
                );
                detail.insert("tool".to_string(), item.get("tool").cloned().unwrap_or(Value::Null));
                detail.insert(
                    "status".to_string(),
                    item.get("status").cloned().unwrap_or(Value::Null),
                );
                (short_tool_name(item), detail)
            };
            if let Some(arguments) = item.get("arguments") {
                detail.insert("arguments".to_string(), arguments.clone());
            }

            match phase {
                ActionPhase::Started | ActionPhase::Updated => vec![action(
                    phase,
                    Action {
                        id: action_id.to_string(),
                        kind: ActionKind::Tool,
                        title,
                        detail,
                    },
                    None,
                )],
                ActionPhase::Completed => {
                    let error = item.get("error").filter(|error| !error.is_null());
                    let ok = item.get("status").and_then(Value::as_str) != Some("failed")
                        && error.is_none();
                    if let Some(error) = error {
                        let message = match error {
                            Value::String(message) => message.clone(),
                            other => other
                                .get("message")
                                .and_then(Value::as_str)
                                .map(str::to_string)
                                .unwrap_or_else(|| other.to_string()),
                        };
                        detail.insert("error_message".to_string(), Value::String(message));
                    }
                    if let Some(summary) = summarize_tool_result(item.get("result")) {
                        detail.insert("result_summary".to_string(), Value::Object(summary));
                    }
                    vec![action(
                        ActionPhase::Completed,
                        Action {
                            id: action_id.to_string(),
                            kind: ActionKind::Tool,
                            title,
                            detail,
                        },
                        Some(ok),
                    )]
                }
            }
        }

        "web_search" => {
            let title = item
                .get("query")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string();
            let mut detail = Map::new();
            detail.insert("query".to_string(), item.get("query").cloned().unwrap_or(Value::Null));
            let ok = (phase == ActionPhase::Completed).then_some(true);
            vec![action(
                phase,
                Action {
                    id: action_id.to_string(),
                    kind: ActionKind::WebSearch,
                    title,
                    detail,
                },
                ok,
            )]
        }

        "file_change" => {
            if phase != ActionPhase::Completed {
                return Vec::new();
            }
            let title = format_change_summary(item);
            let mut detail = Map::new();
            detail.insert(
                "changes".to_string(),
                item.get("changes").cloned().unwrap_or_else(|| Value::Array(Vec::new())),
            );
            detail.insert(
                "status".to_string(),
                item.get("status").cloned().unwrap_or(Value::Null),
            );
            detail.insert("error".to_string(), item.get("error").cloned().unwrap_or(Value::Null));
            let ok = item.get("status").and_then(Value::as_str) != Some("failed");
            vec![action(
                ActionPhase::Completed,
                Action {
                    id: action_id.to_string(),
                    kind: ActionKind::FileChange,
                    title,
                    detail,
                },
                Some(ok),
            )]
        }

        "reasoning" | "todo_list" => {
            let (title, detail) = if item_type == "todo_list" {
                let summary = summarize_todo_list(item.get("items"));
                let mut detail = Map::new();
                detail.insert("done".to_string(), Value::from(summary.done));
                detail.insert("total".to_string(), Value::from(summary.total));
                (todo_title(&summary), detail)
            } else {
                let title = item
                    .get("text")
                    .and_then(Value::as_str)
                    .unwrap_or("")
                    .to_string();
                (title, Map::new())
            };
            let ok = (phase == ActionPhase::Completed).then_some(true);
            vec![action(
                phase,
                Action {
                    id: action_id.to_string(),
                    kind: ActionKind::Note,
                    title,
                    detail,
                },
                ok,
            )]
        }

        _ => Vec::new(),
    }
}

/// Runner for the Codex CLI (`codex exec --json`).
#[derive(Debug, Clone)]
pub struct CodexRunner {
    pub codex_cmd: String,
    pub extra_args: Vec<String>,
    pub session_title: String,
}

impl Default for CodexRunner {
    fn default() -> Self {
        Self {
            codex_cmd: "codex".to_string(),
            extra_args: vec!["-c".to_string(), "notify=[]".to_string()],
            session_title: "Codex".to_string(),
        }
    }
}

impl CodexRunner {
    fn build_spec(&self, prompt: &str, resume: Option<&ResumeToken>) -> CommandSpec {
        let mut args = self.extra_args.clone();
        args.push("exec".to_string());
        args.push("--json".to_string());
        if let Some(token) = resume {
            args.push("resume".to_string());
            args.push(token.value.clone());
        }
        args.push("-".to_string());
        CommandSpec::new(&self.codex_cmd, args).stdin(prompt.as_bytes().to_vec())
    }
}

impl Runner for CodexRunner {
    fn engine(&self) -> EngineId {
        ENGINE
    }

    fn format_resume(&self, token: &ResumeToken) -> Result<String, RunnerError> {
        if token.engine != ENGINE {
            return Err(RunnerError::ForeignToken {
                engine: ENGINE,
                got: token.engine,
            });
        }
        Ok(RESUME.format(&token.value))
    }

    fn extract_resume(&self, text: &str) -> Option<ResumeToken> {
        RESUME.extract(text)
    }

    fn run(&self, prompt: &str, resume: Option<ResumeToken>) -> EventStream {
        tracing::info!(resume = ?resume.as_ref().map(|token| token.value.as_str()), "[codex] start run");
        tracing::debug!(prompt, "[codex] prompt");
        let spec = self.build_spec(prompt, resume.as_ref());
        let translator = CodexTranslator::new(self.session_title.clone());
        drive(spec, translator, resume, SessionLocks::global())
    }
}
