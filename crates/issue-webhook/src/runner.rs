//! External command execution.
//!
//! Workflows describe each subprocess as a [`CommandSpec`] and hand it to a
//! [`CommandRunner`]. The production runner spawns real processes with a
//! bounded wait; tests substitute a recording runner.

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::ToolError;

/// Maximum stderr kept in error messages.
const STDERR_SUMMARY_LIMIT: usize = 2000;

/// One external command invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// Executable name or path
    pub program: String,
    /// Arguments
    pub args: Vec<String>,
    /// Working directory, inherited when `None`
    pub cwd: Option<PathBuf>,
    /// Text fed to standard input; stdin is closed when `None`
    pub stdin: Option<String>,
    /// Bounded wait; the process is killed when it elapses
    pub timeout: Duration,
}

impl CommandSpec {
    /// Create a command with no arguments.
    #[must_use]
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            stdin: None,
            timeout,
        }
    }

    /// Append arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set the working directory.
    #[must_use]
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Feed `input` on standard input.
    ///
    /// Used for prompts and comment bodies, which can exceed the kernel's
    /// per-argument size limit.
    #[must_use]
    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    /// Short description for logs: program plus first argument.
    #[must_use]
    pub fn describe(&self) -> String {
        match self.args.first() {
            Some(sub) if !sub.starts_with('-') && sub.len() < 32 => {
                format!("{} {sub}", self.program)
            }
            _ => self.program.clone(),
        }
    }
}

/// Captured output of a successful command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Standard output
    pub stdout: String,
    /// Standard error
    pub stderr: String,
}

/// Executes external commands.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run a command to completion.
    ///
    /// A non-zero exit, spawn failure or timeout is an error.
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, ToolError>;
}

/// Runs commands as child processes via `tokio::process`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, ToolError> {
        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .stdin(if spec.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &spec.cwd {
            command.current_dir(dir);
        }

        debug!(command = %spec.describe(), cwd = ?spec.cwd, "Spawning command");

        let mut child = command.spawn().map_err(|source| ToolError::Spawn {
            program: spec.program.clone(),
            source,
        })?;

        // Fed from a separate task while we drain stdout and stderr below
        if let (Some(input), Some(mut pipe)) = (spec.stdin.clone(), child.stdin.take()) {
            let described = spec.describe();
            tokio::spawn(async move {
                if let Err(e) = pipe.write_all(input.as_bytes()).await {
                    debug!(command = %described, error = %e, "Child closed stdin early");
                }
            });
        }

        // Dropping the wait future on timeout kills the child
        let output = tokio::time::timeout(spec.timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                warn!(
                    command = %spec.describe(),
                    timeout_secs = spec.timeout.as_secs(),
                    "Command timed out"
                );
                ToolError::Timeout {
                    program: spec.program.clone(),
                    timeout: spec.timeout,
                }
            })?
            .map_err(|source| ToolError::Spawn {
                program: spec.program.clone(),
                source,
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        if !output.status.success() {
            let status = output
                .status
                .code()
                .map_or_else(|| "signal".to_string(), |code| code.to_string());
            return Err(ToolError::Failed {
                program: spec.program.clone(),
                status,
                stderr: summarize(&stderr, &stdout),
            });
        }

        debug!(
            command = %spec.describe(),
            stdout_bytes = stdout.len(),
            "Command completed"
        );
        Ok(CommandOutput { stdout, stderr })
    }
}

/// Pick the most useful failure text and cap its length.
fn summarize(stderr: &str, stdout: &str) -> String {
    let text = if stderr.trim().is_empty() {
        stdout.trim()
    } else {
        stderr.trim()
    };
    if text.len() <= STDERR_SUMMARY_LIMIT {
        return text.to_string();
    }
    let mut end = STDERR_SUMMARY_LIMIT;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...(truncated)", &text[..end])
}
