// ABOUTME: Engine backend descriptors and setup-check helpers.
// ABOUTME: The engine set is fixed at build time; discovery lives in engines.rs.

use std::env;
use std::path::{Path, PathBuf};

use takopi_runner::Runner;

use crate::config::{ConfigError, EngineConfig};

/// One onboarding diagnostic: a title plus indented detail lines.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SetupIssue {
    pub title: &'static str,
    pub lines: &'static [&'static str],
}

pub type CheckSetup = fn(&EngineConfig, &Path) -> Vec<SetupIssue>;
pub type BuildRunner = fn(&EngineConfig, &Path) -> Result<Box<dyn Runner>, ConfigError>;
pub type StartupMessage = fn(&str) -> String;

/// Descriptor for one wired-in engine backend.
#[derive(Debug, Clone)]
pub struct EngineBackend {
    pub id: &'static str,
    pub check_setup: CheckSetup,
    pub build_runner: BuildRunner,
    pub startup_message: StartupMessage,
}

/// Locate `program` on `PATH`. Programs containing a path separator are
/// checked directly.
pub fn find_program(program: &str) -> Option<PathBuf> {
    if program.contains(std::path::MAIN_SEPARATOR) {
        let path = PathBuf::from(program);
        return path.is_file().then_some(path);
    }
    let paths = env::var_os("PATH")?;
    env::split_paths(&paths)
        .map(|dir| dir.join(program))
        .find(|candidate| candidate.is_file())
}

/// Standard check: report `issue` when `program` is missing from `PATH`.
pub fn which_issue(program: &str, issue: &SetupIssue) -> Vec<SetupIssue> {
    if find_program(program).is_some() {
        Vec::new()
    } else {
        vec![issue.clone()]
    }
}
