// ABOUTME: Claude Code backend - spawns `claude -p` with stream-json output.
// ABOUTME: Translates the vendor stream into shared events and builds the CLI invocation.

use std::collections::HashMap;

use serde_json::{json, Map, Value};

use crate::locks::SessionLocks;
use crate::model::{
    Action, ActionEvent, ActionKind, ActionLevel, ActionPhase, CompletedEvent, EngineId,
    ResumeToken, StartedEvent, TakopiEvent,
};
use crate::paths::{relativize_command, relativize_path};
use crate::resume::ResumeSyntax;
use crate::runner::{drive, EventStream, Runner, RunnerError, Translator};
use crate::transport::CommandSpec;

pub const ENGINE: EngineId = EngineId::Claude;

static RESUME: ResumeSyntax = ResumeSyntax::new(ENGINE, "claude", "--resume", Some("-r"));

const META_KEYS: [&str; 6] = [
    "cwd",
    "tools",
    "permissionMode",
    "output_style",
    "apiKeySource",
    "mcp_servers",
];

/// Per-run translation state for the Claude stream.
#[derive(Debug, Default)]
pub struct ClaudeTranslator {
    session_title: String,
    pending: HashMap<String, Action>,
    last_assistant_text: Option<String>,
    session_seen: bool,
    note_seq: u32,
}

impl ClaudeTranslator {
    pub fn new(session_title: impl Into<String>) -> Self {
        Self {
            session_title: session_title.into(),
            ..Self::default()
        }
    }

    fn on_init(&mut self, event: &Value) -> Vec<TakopiEvent> {
        let Some(session_id) = event.get("session_id").and_then(Value::as_str) else {
            return Vec::new();
        };
        if self.session_seen {
            return Vec::new();
        }
        self.session_seen = true;

        let title = event
            .get("model")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| self.session_title.clone());
        let mut meta = Map::new();
        for key in META_KEYS {
            if let Some(value) = event.get(key) {
                meta.insert(key.to_string(), value.clone());
            }
        }

        vec![TakopiEvent::Started(StartedEvent {
            engine: ENGINE,
            resume: ResumeToken::new(ENGINE, session_id),
            title,
            meta: (!meta.is_empty()).then_some(meta),
        })]
    }

    fn on_assistant(&mut self, event: &Value) -> Vec<TakopiEvent> {
        let Some(message) = event.get("message").and_then(Value::as_object) else {
            return Vec::new();
        };
        let message_id = message.get("id").and_then(Value::as_str);
        let parent_tool_use_id = event.get("parent_tool_use_id").and_then(Value::as_str);
        let Some(blocks) = message.get("content").and_then(Value::as_array) else {
            return Vec::new();
        };

        let mut out = Vec::new();
        for block in blocks {
            match block.get("type").and_then(Value::as_str) {
                Some("tool_use") => {
                    if let Some(action) = tool_action(block, message_id, parent_tool_use_id) {
                        self.pending.insert(action.id.clone(), action.clone());
                        out.push(TakopiEvent::Action(ActionEvent {
                            engine: ENGINE,
                            action,
                            phase: ActionPhase::Started,
                            ok: None,
                            message: None,
                            level: None,
                        }));
                    }
                }
                Some("text") => {
                    if let Some(text) = block.get("text").and_then(Value::as_str) {
                        if !text.is_empty() {
                            self.last_assistant_text = Some(text.to_string());
                        }
                    }
                }
                _ => {}
            }
        }
        out
    }

    fn on_user(&mut self, event: &Value) -> Vec<TakopiEvent> {
        let Some(message) = event.get("message").and_then(Value::as_object) else {
            return Vec::new();
        };
        let message_id = message.get("id").and_then(Value::as_str);
        let Some(blocks) = message.get("content").and_then(Value::as_array) else {
            return Vec::new();
        };

        let mut out = Vec::new();
        for block in blocks {
            if block.get("type").and_then(Value::as_str) != Some("tool_result") {
                continue;
            }
            let Some(tool_use_id) = block
                .get("tool_use_id")
                .and_then(Value::as_str)
                .filter(|id| !id.is_empty())
            else {
                continue;
            };
            // an orphan result still yields a valid completed action
            let action = self.pending.remove(tool_use_id).unwrap_or_else(|| Action {
                id: tool_use_id.to_string(),
                kind: ActionKind::Tool,
                title: "tool result".to_string(),
                detail: Map::new(),
            });
            out.push(tool_result_event(block, action, message_id));
        }
        out
    }

    fn on_result(&mut self, event: &Value) -> Vec<TakopiEvent> {
        let mut out = Vec::new();

        if let Some(denials) = event.get("permission_denials").and_then(Value::as_array) {
            for (idx, denial) in denials.iter().enumerate() {
                let Some(denial_map) = denial.as_object() else {
                    continue;
                };
                let title = match denial_map
                    .get("tool_name")
                    .and_then(Value::as_str)
                    .filter(|name| !name.is_empty())
                {
                    Some(name) => format!("permission denied: {name}"),
                    None => "permission denied".to_string(),
                };
                let action_id = match denial_map
                    .get("tool_use_id")
                    .and_then(Value::as_str)
                    .filter(|id| !id.is_empty())
                {
                    Some(id) => format!("claude.permission.{id}"),
                    None => format!("claude.permission.{idx}"),
                };
                out.push(TakopiEvent::Action(ActionEvent {
                    engine: ENGINE,
                    action: Action {
                        id: action_id,
                        kind: ActionKind::Warning,
                        title,
                        detail: denial_map.clone(),
                    },
                    phase: ActionPhase::Completed,
                    ok: Some(false),
                    message: None,
                    level: Some(ActionLevel::Warning),
                }));
            }
        }

        let ok = !event
            .get("is_error")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let mut answer = event
            .get("result")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        if ok && answer.is_empty() {
            if let Some(text) = &self.last_assistant_text {
                answer = text.clone();
            }
        }
        let resume = event
            .get("session_id")
            .and_then(Value::as_str)
            .map(|sid| ResumeToken::new(ENGINE, sid));
        let error = (!ok).then(|| extract_error(event));

        out.push(TakopiEvent::Completed(CompletedEvent {
            engine: ENGINE,
            ok,
            answer,
            resume,
            error,
            usage: usage_payload(event),
        }));
        out
    }
}

impl Translator for ClaudeTranslator {
    fn engine(&self) -> EngineId {
        ENGINE
    }

    fn label(&self) -> &'static str {
        "claude"
    }

    fn session_noun(&self) -> &'static str {
        "session_id"
    }

    fn translate(&mut self, event: &Value) -> Vec<TakopiEvent> {
        match event.get("type").and_then(Value::as_str) {
            Some("system")
                if event.get("subtype").and_then(Value::as_str) == Some("init") =>
            {
                self.on_init(event)
            }
            Some("assistant") => self.on_assistant(event),
            Some("user") => self.on_user(event),
            Some("result") => self.on_result(event),
            _ => Vec::new(),
        }
    }

    fn next_note_id(&mut self) -> String {
        self.note_seq += 1;
        format!("claude.note.{}", self.note_seq)
    }

    fn fallback_answer(&self) -> Option<&str> {
        self.last_assistant_text.as_deref()
    }
}

fn tool_input_path(input: &Map<String, Value>) -> Option<&str> {
    ["file_path", "path"].into_iter().find_map(|key| {
        input
            .get(key)
            .and_then(Value::as_str)
            .filter(|path| !path.is_empty())
    })
}

fn tool_kind_and_title(name: &str, input: &Map<String, Value>) -> (ActionKind, String) {
    match name {
        "Bash" | "Shell" | "KillShell" => {
            let command = input.get("command").and_then(Value::as_str).unwrap_or(name);
            (ActionKind::Command, relativize_command(command))
        }
        "Edit" | "Write" | "NotebookEdit" | "MultiEdit" => match tool_input_path(input) {
            Some(path) => (ActionKind::FileChange, relativize_path(path)),
            None => (ActionKind::FileChange, name.to_string()),
        },
        "Read" => match tool_input_path(input) {
            Some(path) => (ActionKind::Tool, format!("read: `{}`", relativize_path(path))),
            None => (ActionKind::Tool, "read".to_string()),
        },
        "Glob" => match input.get("pattern").and_then(Value::as_str) {
            Some(pattern) => (ActionKind::Tool, format!("glob: `{pattern}`")),
            None => (ActionKind::Tool, "glob".to_string()),
        },
        "Grep" => match input.get("pattern").and_then(Value::as_str) {
            Some(pattern) => (ActionKind::Tool, format!("grep: {pattern}")),
            None => (ActionKind::Tool, "grep".to_string()),
        },
        "WebSearch" => {
            let query = input.get("query").and_then(Value::as_str).unwrap_or("search");
            (ActionKind::WebSearch, query.to_string())
        }
        "WebFetch" => {
            let url = input.get("url").and_then(Value::as_str).unwrap_or("fetch");
            (ActionKind::WebSearch, url.to_string())
        }
        "TodoWrite" => (ActionKind::Note, "update todos".to_string()),
        "TodoRead" => (ActionKind::Note, "read todos".to_string()),
        "AskUserQuestion" => (ActionKind::Note, "ask user".to_string()),
        "Task" | "Agent" => {
            let desc = input
                .get("description")
                .and_then(Value::as_str)
                .or_else(|| input.get("prompt").and_then(Value::as_str));
            (ActionKind::Tool, desc.unwrap_or(name).to_string())
        }
        _ => (ActionKind::Tool, name.to_string()),
    }
}

fn tool_action(
    block: &Value,
    message_id: Option<&str>,
    parent_tool_use_id: Option<&str>,
) -> Option<Action> {
    let tool_id = block
        .get("id")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())?;
    let tool_name = block.get("name").and_then(Value::as_str).unwrap_or("tool");
    let empty = Map::new();
    let input = block.get("input").and_then(Value::as_object).unwrap_or(&empty);

    let (kind, title) = tool_kind_and_title(tool_name, input);

    let mut detail = Map::new();
    detail.insert("name".to_string(), Value::String(tool_name.to_string()));
    detail.insert("input".to_string(), Value::Object(input.clone()));
    if let Some(id) = message_id {
        detail.insert("message_id".to_string(), Value::String(id.to_string()));
    }
    if let Some(id) = parent_tool_use_id {
        detail.insert("parent_tool_use_id".to_string(), Value::String(id.to_string()));
    }
    if kind == ActionKind::FileChange {
        if let Some(path) = tool_input_path(input) {
            detail.insert("changes".to_string(), json!([{"path": path, "kind": "update"}]));
        }
    }

    Some(Action {
        id: tool_id.to_string(),
        kind,
        title,
        detail,
    })
}

fn normalize_tool_result(content: Option<&Value>) -> String {
    match content {
        Some(Value::Array(items)) => {
            let mut parts: Vec<&str> = Vec::new();
            for item in items {
                match item {
                    Value::Object(map) => {
                        if let Some(text) = map.get("text").and_then(Value::as_str) {
                            parts.push(text);
                        }
                    }
                    Value::String(text) => parts.push(text),
                    _ => {}
                }
            }
            parts
                .into_iter()
                .filter(|part| !part.is_empty())
                .collect::<Vec<_>>()
                .join("\n")
        }
        None | Some(Value::Null) => String::new(),
        Some(Value::String(text)) => text.clone(),
        Some(other) => other.to_string(),
    }
}

fn tool_result_event(block: &Value, action: Action, message_id: Option<&str>) -> TakopiEvent {
    let is_error = block
        .get("is_error")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let normalized = normalize_tool_result(block.get("content"));

    let mut detail = action.detail.clone();
    detail.insert(
        "tool_use_id".to_string(),
        block.get("tool_use_id").cloned().unwrap_or(Value::Null),
    );
    detail.insert("result_preview".to_string(), Value::String(normalized.clone()));
    detail.insert("result_len".to_string(), Value::from(normalized.len()));
    detail.insert("is_error".to_string(), Value::Bool(is_error));
    if let Some(id) = message_id {
        detail.insert("message_id".to_string(), Value::String(id.to_string()));
    }

    TakopiEvent::Action(ActionEvent {
        engine: ENGINE,
        action: Action { detail, ..action },
        phase: ActionPhase::Completed,
        ok: Some(!is_error),
        message: None,
        level: None,
    })
}

fn extract_error(event: &Value) -> String {
    if let Some(error) = event
        .get("error")
        .and_then(Value::as_str)
        .filter(|msg| !msg.is_empty())
    {
        return error.to_string();
    }
    if let Some(errors) = event.get("errors").and_then(Value::as_array) {
        for item in errors {
            match item {
                Value::Object(map) => {
                    let message = map
                        .get("message")
                        .or_else(|| map.get("error"))
                        .and_then(Value::as_str)
                        .filter(|msg| !msg.is_empty());
                    if let Some(message) = message {
                        return message.to_string();
                    }
                }
                Value::String(message) if !message.is_empty() => return message.clone(),
                _ => {}
            }
        }
    }
    "claude run failed".to_string()
}

fn usage_payload(event: &Value) -> Option<Map<String, Value>> {
    let mut usage = Map::new();
    for key in [
        "total_cost_usd",
        "duration_ms",
        "duration_api_ms",
        "num_turns",
        "usage",
        "modelUsage",
    ] {
        if let Some(value) = event.get(key) {
            if !value.is_null() {
                usage.insert(key.to_string(), value.clone());
            }
        }
    }
    (!usage.is_empty()).then_some(usage)
}

/// Runner for the Claude Code CLI.
#[derive(Debug, Clone)]
pub struct ClaudeRunner {
    pub claude_cmd: String,
    pub model: Option<String>,
    pub allowed_tools: Option<Vec<String>>,
    pub dangerously_skip_permissions: bool,
    pub use_api_billing: bool,
    pub session_title: String,
}

impl Default for ClaudeRunner {
    fn default() -> Self {
        Self {
            claude_cmd: "claude".to_string(),
            model: None,
            allowed_tools: None,
            dangerously_skip_permissions: false,
            use_api_billing: false,
            session_title: "claude".to_string(),
        }
    }
}

impl ClaudeRunner {
    fn build_spec(&self, prompt: &str, resume: Option<&ResumeToken>) -> CommandSpec {
        let mut args = vec![
            "-p".to_string(),
            "--output-format".to_string(),
            "stream-json".to_string(),
            "--verbose".to_string(),
        ];
        if let Some(token) = resume {
            args.push("--resume".to_string());
            args.push(token.value.clone());
        }
        if let Some(model) = &self.model {
            args.push("--model".to_string());
            args.push(model.clone());
        }
        if let Some(tools) = &self.allowed_tools {
            let joined = tools
                .iter()
                .filter(|tool| !tool.is_empty())
                .cloned()
                .collect::<Vec<_>>()
                .join(",");
            if !joined.is_empty() {
                args.push("--allowedTools".to_string());
                args.push(joined);
            }
        }
        if self.dangerously_skip_permissions {
            args.push("--dangerously-skip-permissions".to_string());
        }
        args.push("--".to_string());
        args.push(prompt.to_string());

        let mut spec = CommandSpec::new(&self.claude_cmd, args);
        if !self.use_api_billing {
            // the CLI must not pick up ambient API credentials
            spec = spec.env_remove("ANTHROPIC_API_KEY");
        }
        spec
    }
}

impl Runner for ClaudeRunner {
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
        tracing::info!(resume = ?resume.as_ref().map(|token| token.value.as_str()), "[claude] start run");
        tracing::debug!(prompt, "[claude] prompt");
        let spec = self.build_spec(prompt, resume.as_ref());
        let translator = ClaudeTranslator::new(self.session_title.clone());
        drive(spec, translator, resume, SessionLocks::global())
    }
}
