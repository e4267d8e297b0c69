// ABOUTME: Subprocess transport - spawns agent CLIs with fully piped stdio.
// ABOUTME: Yields decoded JSONL stdout lines and drains stderr into a bounded tail.

use std::collections::VecDeque;
use std::io;
use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdout, Command};
use tokio::task::JoinHandle;

/// Number of trailing stderr lines kept for failure diagnostics.
pub const STDERR_TAIL_LINES: usize = 200;

/// Invocation of one agent subprocess.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Environment variables stripped from the child (credential scrubbing).
    pub env_remove: Vec<String>,
    /// Bytes written to the child's stdin before it is closed; `None`
    /// closes stdin immediately.
    pub stdin: Option<Vec<u8>>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            env_remove: Vec::new(),
            stdin: None,
        }
    }

    pub fn env_remove(mut self, key: impl Into<String>) -> Self {
        self.env_remove.push(key.into());
        self
    }

    pub fn stdin(mut self, bytes: Vec<u8>) -> Self {
        self.stdin = Some(bytes);
        self
    }
}

/// One stdout line: the raw text plus its decoded JSON value, if any.
///
/// A line that fails to decode is surfaced with `data: None` instead of
/// failing the stream, so the caller can emit a recoverable warning.
#[derive(Debug, Clone)]
pub struct JsonLine {
    pub raw: String,
    pub data: Option<Value>,
}

/// A running agent subprocess.
///
/// The child is configured kill-on-drop, so abandoning the value mid-run
/// cannot leak a process; the stderr drain task is aborted on drop too.
pub struct Subprocess {
    child: Child,
    stdout: Lines<BufReader<ChildStdout>>,
    stderr_tail: Arc<Mutex<VecDeque<String>>>,
    stderr_task: Option<JoinHandle<()>>,
    tag: &'static str,
}

impl Subprocess {
    /// Spawn the child, feed and close stdin, and start draining stderr.
    ///
    /// Stderr must be consumed concurrently with stdout: a chatty
    /// diagnostic stream would otherwise fill its pipe and stall the child.
    pub async fn spawn(spec: CommandSpec, tag: &'static str) -> io::Result<Self> {
        tracing::debug!(program = %spec.program, args = ?spec.args, tag, "spawning agent subprocess");
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for key in &spec.env_remove {
            cmd.env_remove(key);
        }
        let mut child = cmd.spawn()?;

        let mut stdin = child.stdin.take();
        if let (Some(pipe), Some(bytes)) = (stdin.as_mut(), spec.stdin.as_deref()) {
            pipe.write_all(bytes).await?;
        }
        // dropping the handle closes the pipe so the child sees EOF
        drop(stdin);

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::other("subprocess stdout pipe missing"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| io::Error::other("subprocess stderr pipe missing"))?;

        let stderr_tail = Arc::new(Mutex::new(VecDeque::with_capacity(STDERR_TAIL_LINES)));
        let tail = Arc::clone(&stderr_tail);
        let stderr_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::debug!(stderr = %line, tag, "agent stderr");
                let mut tail = tail.lock().unwrap_or_else(PoisonError::into_inner);
                if tail.len() == STDERR_TAIL_LINES {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
        });

        Ok(Self {
            child,
            stdout: BufReader::new(stdout).lines(),
            stderr_tail,
            stderr_task: Some(stderr_task),
            tag,
        })
    }

    /// Next stdout line, decoded. Blank lines are skipped; `None` at EOF.
    pub async fn next_json(&mut self) -> Option<JsonLine> {
        loop {
            match self.stdout.next_line().await {
                Ok(Some(line)) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    let data = serde_json::from_str(trimmed).ok();
                    if data.is_none() {
                        tracing::warn!(line = %line, tag = self.tag, "undecodable agent output line");
                    }
                    return Some(JsonLine { raw: line, data });
                }
                Ok(None) => return None,
                Err(err) => {
                    tracing::warn!(error = %err, tag = self.tag, "agent stdout read failed");
                    return None;
                }
            }
        }
    }

    /// Wait for the child to exit; call after the stdout stream is
    /// exhausted. Joins the stderr drain first so the tail is complete.
    pub async fn wait(&mut self) -> io::Result<Option<i32>> {
        let status = self.child.wait().await?;
        if let Some(task) = self.stderr_task.take() {
            let _ = task.await;
        }
        tracing::debug!(code = ?status.code(), tag = self.tag, "agent subprocess exited");
        Ok(status.code())
    }

    /// Bounded tail of diagnostic output, newline-joined.
    pub fn stderr_tail(&self) -> String {
        let tail = self
            .stderr_tail
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        tail.iter().cloned().collect::<Vec<_>>().join("\n")
    }
}

impl Drop for Subprocess {
    fn drop(&mut self) {
        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }
    }
}
