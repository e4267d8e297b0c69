// ABOUTME: Test support - builds fake agent CLI scripts that replay JSONL streams.
// ABOUTME: Scripts can gate on a file, record start/finish markers, and exit nonzero.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// Builder for a small `sh` script that impersonates an agent CLI.
///
/// The script emits its stderr lines, then its stdout lines, optionally
/// blocks until a gate file exists, emits the post-gate lines, and exits.
/// A marker file records `S` when the script starts and `E` when it
/// finishes, which is how lock-serialization tests observe interleaving.
#[derive(Debug, Clone, Default)]
pub struct FakeAgent {
    stdout_lines: Vec<String>,
    stderr_lines: Vec<String>,
    gated_lines: Vec<String>,
    gate_file: Option<PathBuf>,
    marker_file: Option<PathBuf>,
    exit_code: i32,
}

impl FakeAgent {
    pub fn new() -> Self {
        Self::default()
    }

    /// Emit `line` on stdout before the gate.
    pub fn line(mut self, line: impl Into<String>) -> Self {
        self.stdout_lines.push(line.into());
        self
    }

    /// Emit `line` on stderr at startup.
    pub fn stderr_line(mut self, line: impl Into<String>) -> Self {
        self.stderr_lines.push(line.into());
        self
    }

    /// Block until `path` exists before emitting post-gate lines and exiting.
    pub fn gate_on(mut self, path: impl Into<PathBuf>) -> Self {
        self.gate_file = Some(path.into());
        self
    }

    /// Emit `line` on stdout after the gate opens.
    pub fn line_after_gate(mut self, line: impl Into<String>) -> Self {
        self.gated_lines.push(line.into());
        self
    }

    /// Append `S` to `path` on start and `E` on finish.
    pub fn mark_to(mut self, path: impl Into<PathBuf>) -> Self {
        self.marker_file = Some(path.into());
        self
    }

    pub fn exit_code(mut self, code: i32) -> Self {
        self.exit_code = code;
        self
    }

    /// Write the script to `path` and make it executable.
    pub fn write_to(&self, path: &Path) -> Result<()> {
        let mut script = String::from("#!/bin/sh\n");
        if let Some(marker) = &self.marker_file {
            script.push_str(&format!("echo S >> {}\n", quote(&marker.to_string_lossy())));
        }
        for line in &self.stderr_lines {
            script.push_str(&format!("echo {} >&2\n", quote(line)));
        }
        for line in &self.stdout_lines {
            script.push_str(&format!("echo {}\n", quote(line)));
        }
        if let Some(gate) = &self.gate_file {
            script.push_str(&format!(
                "while [ ! -e {} ]; do sleep 0.01; done\n",
                quote(&gate.to_string_lossy())
            ));
        }
        for line in &self.gated_lines {
            script.push_str(&format!("echo {}\n", quote(line)));
        }
        if let Some(marker) = &self.marker_file {
            script.push_str(&format!("echo E >> {}\n", quote(&marker.to_string_lossy())));
        }
        script.push_str(&format!("exit {}\n", self.exit_code));

        fs::write(path, script).with_context(|| format!("write fake agent to {}", path.display()))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(path, fs::Permissions::from_mode(0o755))
                .with_context(|| format!("chmod fake agent at {}", path.display()))?;
        }
        Ok(())
    }
}

fn quote(text: &str) -> String {
    format!("'{}'", text.replace('\'', r"'\''"))
}
