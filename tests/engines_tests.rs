// ABOUTME: Engine discovery and builder tests for the fixed backend registry.

use std::fs;
use std::path::Path;

use serial_test::serial;
use takopi::backends::find_program;
use takopi::engines::{get_backend, list_backend_ids};
use takopi::{ConfigError, EngineId, ResumeToken};

#[test]
fn test_discovery_lists_sorted_backend_ids() {
    assert_eq!(list_backend_ids(), vec!["claude", "codex"]);
}

#[test]
fn test_unknown_engine_is_an_error() {
    let err = get_backend("mock").unwrap_err();
    let message = err.to_string();
    assert!(message.contains("Unknown engine `mock`"));
    assert!(message.contains("claude, codex"));
}

#[test]
fn test_startup_messages_name_the_engine_and_cwd() {
    let claude = get_backend("claude").unwrap();
    assert_eq!(
        (claude.startup_message)("/work/demo"),
        "claude is ready\npwd: /work/demo"
    );
    let codex = get_backend("codex").unwrap();
    assert_eq!(
        (codex.startup_message)("/work/demo"),
        "codex is ready\npwd: /work/demo"
    );
}

#[test]
fn test_claude_builder_accepts_model_and_tools() {
    let backend = get_backend("claude").unwrap();
    let config = toml::toml! {
        model = "opus"
        allowed_tools = ["Bash", "Read"]
        dangerously_skip_permissions = true
    };

    let runner = (backend.build_runner)(&config, Path::new("takopi.toml")).unwrap();
    assert_eq!(runner.engine(), EngineId::Claude);

    let token = ResumeToken::new(EngineId::Claude, "sess-1");
    assert_eq!(
        runner.format_resume(&token).unwrap(),
        "`claude --resume sess-1`"
    );
}

#[test]
fn test_claude_builder_rejects_bad_allowed_tools() {
    let backend = get_backend("claude").unwrap();
    let config = toml::toml! { allowed_tools = 42 };

    let err = (backend.build_runner)(&config, Path::new("takopi.toml")).unwrap_err();
    assert!(matches!(err, ConfigError::InvalidValue { .. }));
    let message = err.to_string();
    assert!(message.contains("claude.allowed_tools"));
    assert!(message.contains("takopi.toml"));
}

#[test]
fn test_find_program_resolves_explicit_paths() {
    let dir = tempfile::tempdir().unwrap();
    let tool = dir.path().join("some-tool");
    fs::write(&tool, "#!/bin/sh\n").unwrap();

    let found = find_program(&tool.to_string_lossy()).unwrap();
    assert_eq!(found, tool);
    assert!(find_program(&dir.path().join("missing").to_string_lossy()).is_none());
}

#[test]
#[serial]
fn test_codex_builder_requires_codex_on_path() {
    let dir = tempfile::tempdir().unwrap();
    let saved_path = std::env::var_os("PATH");
    std::env::set_var("PATH", dir.path());

    let backend = get_backend("codex").unwrap();
    let config = toml::Table::new();
    let err = (backend.build_runner)(&config, Path::new("takopi.toml")).unwrap_err();
    assert!(err.to_string().contains("codex not found on PATH"));

    // with a codex binary present, the builder succeeds
    let codex = dir.path().join("codex");
    fs::write(&codex, "#!/bin/sh\nexit 0\n").unwrap();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&codex, fs::Permissions::from_mode(0o755)).unwrap();
    }
    let runner = (backend.build_runner)(&config, Path::new("takopi.toml")).unwrap();
    assert_eq!(runner.engine(), EngineId::Codex);

    match saved_path {
        Some(path) => std::env::set_var("PATH", path),
        None => std::env::remove_var("PATH"),
    }
}

#[test]
#[serial]
fn test_codex_setup_check_reports_missing_cli() {
    let dir = tempfile::tempdir().unwrap();
    let saved_path = std::env::var_os("PATH");
    std::env::set_var("PATH", dir.path());

    let backend = get_backend("codex").unwrap();
    let config = toml::Table::new();
    let issues = (backend.check_setup)(&config, Path::new("takopi.toml"));
    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0].title, "Install the Codex CLI");

    match saved_path {
        Some(path) => std::env::set_var("PATH", path),
        None => std::env::remove_var("PATH"),
    }
}
