// ABOUTME: Fixed engine registry - the claude and codex backends plus discovery.
// ABOUTME: Per-engine config validation, setup checks, and startup messages.

use std::path::Path;

use takopi_runner::runners::claude::ClaudeRunner;
use takopi_runner::runners::codex::CodexRunner;
use takopi_runner::Runner;

use crate::backends::{find_program, which_issue, EngineBackend, SetupIssue};
use crate::config::{self, ConfigError, EngineConfig};

pub const CLAUDE_INSTALL_ISSUE: SetupIssue = SetupIssue {
    title: "install the claude code cli",
    lines: &["   $ npm install -g @anthropic-ai/claude-code"],
};

pub const CODEX_INSTALL_ISSUE: SetupIssue = SetupIssue {
    title: "Install the Codex CLI",
    lines: &["   $ npm install -g @openai/codex"],
};

static BACKENDS: &[EngineBackend] = &[
    EngineBackend {
        id: "claude",
        check_setup: claude_check_setup,
        build_runner: claude_build_runner,
        startup_message: claude_startup_message,
    },
    EngineBackend {
        id: "codex",
        check_setup: codex_check_setup,
        build_runner: codex_build_runner,
        startup_message: codex_startup_message,
    },
];

/// Ids of all wired-in backends, sorted.
pub fn list_backend_ids() -> Vec<&'static str> {
    let mut ids: Vec<&'static str> = BACKENDS.iter().map(|backend| backend.id).collect();
    ids.sort_unstable();
    ids
}

pub fn get_backend(id: &str) -> Result<&'static EngineBackend, ConfigError> {
    BACKENDS
        .iter()
        .find(|backend| backend.id == id)
        .ok_or_else(|| {
            ConfigError::Other(format!(
                "Unknown engine `{id}`; available: {}",
                list_backend_ids().join(", ")
            ))
        })
}

fn claude_check_setup(_config: &EngineConfig, _path: &Path) -> Vec<SetupIssue> {
    which_issue("claude", &CLAUDE_INSTALL_ISSUE)
}

fn claude_build_runner(
    config: &EngineConfig,
    path: &Path,
) -> Result<Box<dyn Runner>, ConfigError> {
    let model = config::str_value(config, "model", "claude.model", path)?;
    let allowed_tools = config::str_list(config, "allowed_tools", "claude.allowed_tools", path)?;
    let dangerously_skip_permissions = config::flag(config, "dangerously_skip_permissions");
    let use_api_billing = config::flag(config, "use_api_billing");
    let session_title = model.clone().unwrap_or_else(|| "claude".to_string());

    tracing::debug!(?model, ?allowed_tools, "building claude runner");
    Ok(Box::new(ClaudeRunner {
        claude_cmd: "claude".to_string(),
        model,
        allowed_tools,
        dangerously_skip_permissions,
        use_api_billing,
        session_title,
    }))
}

fn claude_startup_message(cwd: &str) -> String {
    format!("claude is ready\npwd: {cwd}")
}

fn codex_check_setup(_config: &EngineConfig, _path: &Path) -> Vec<SetupIssue> {
    which_issue("codex", &CODEX_INSTALL_ISSUE)
}

fn codex_build_runner(config: &EngineConfig, path: &Path) -> Result<Box<dyn Runner>, ConfigError> {
    let codex_cmd = find_program("codex").ok_or_else(|| {
        ConfigError::Other(
            "codex not found on PATH. Install the Codex CLI with:\n  \
             npm install -g @openai/codex\n  \
             # or on macOS\n  \
             brew install codex"
                .to_string(),
        )
    })?;

    let mut extra_args = config::str_list(config, "extra_args", "codex.extra_args", path)?
        .unwrap_or_else(|| vec!["-c".to_string(), "notify=[]".to_string()]);
    let mut session_title = "Codex".to_string();
    if let Some(profile) = config::str_value(config, "profile", "codex.profile", path)? {
        extra_args.push("--profile".to_string());
        extra_args.push(profile.clone());
        session_title = profile;
    }

    tracing::debug!(?extra_args, "building codex runner");
    Ok(Box::new(CodexRunner {
        codex_cmd: codex_cmd.to_string_lossy().into_owned(),
        extra_args,
        session_title,
    }))
}

fn codex_startup_message(cwd: &str) -> String {
    format!("codex is ready\npwd: {cwd}")
}
