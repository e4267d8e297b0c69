// ABOUTME: Display-title helpers that shorten paths under the working directory.
// ABOUTME: Used by translators when deriving action titles from commands and file paths.

use std::env;
use std::path::Path;

/// Relativize `path` against the current working directory for display.
/// Paths outside the working directory are returned unchanged.
pub fn relativize_path(path: &str) -> String {
    match env::current_dir() {
        Ok(cwd) => relativize_path_in(&cwd, path),
        Err(_) => path.to_string(),
    }
}

/// Strip working-directory prefixes from paths mentioned in `command` text.
pub fn relativize_command(command: &str) -> String {
    match env::current_dir() {
        Ok(cwd) => relativize_command_in(&cwd, command),
        Err(_) => command.to_string(),
    }
}

fn relativize_path_in(base: &Path, path: &str) -> String {
    match Path::new(path).strip_prefix(base) {
        Ok(rel) if rel.as_os_str().is_empty() => ".".to_string(),
        Ok(rel) => rel.to_string_lossy().into_owned(),
        Err(_) => path.to_string(),
    }
}

fn relativize_command_in(base: &Path, command: &str) -> String {
    let base = base.to_string_lossy();
    let prefix = format!("{}/", base.trim_end_matches('/'));
    command.replace(&prefix, "")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn path_under_base_is_relativized() {
        let base = PathBuf::from("/work/repo");
        assert_eq!(relativize_path_in(&base, "/work/repo/src/main.rs"), "src/main.rs");
    }

    #[test]
    fn path_outside_base_is_unchanged() {
        let base = PathBuf::from("/work/repo");
        assert_eq!(relativize_path_in(&base, "/etc/hosts"), "/etc/hosts");
        assert_eq!(relativize_path_in(&base, "notes.md"), "notes.md");
    }

    #[test]
    fn base_itself_becomes_dot() {
        let base = PathBuf::from("/work/repo");
        assert_eq!(relativize_path_in(&base, "/work/repo"), ".");
    }

    #[test]
    fn command_paths_are_shortened() {
        let base = PathBuf::from("/work/repo");
        assert_eq!(
            relativize_command_in(&base, "cat /work/repo/notes.md /work/repo/a b"),
            "cat notes.md a b"
        );
        assert_eq!(relativize_command_in(&base, "ls -la"), "ls -la");
    }
}
