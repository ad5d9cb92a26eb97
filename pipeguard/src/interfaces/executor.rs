//! Command executor used by every tool-running stage.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::debug;

use crate::errors::ExecutorError;

/// Maximum captured bytes kept per stream.
const CAPTURE_LIMIT: usize = 16 * 1024;

/// Descriptor of an external tool invocation.
///
/// The runner never interprets it beyond handing it to the executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    /// Program to run.
    pub program: String,
    /// Arguments.
    #[serde(default)]
    pub args: Vec<String>,
    /// Extra environment variables.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Working directory relative to the workspace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
}

impl CommandSpec {
    /// Creates a command with no arguments.
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            working_dir: None,
        }
    }

    /// Creates a `sh -c <script>` command.
    #[must_use]
    pub fn shell(script: impl Into<String>) -> Self {
        Self::new("sh").with_args(["-c".to_string(), script.into()])
    }

    /// Sets the arguments.
    #[must_use]
    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Adds an environment variable.
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Sets the working directory relative to the workspace.
    #[must_use]
    pub fn in_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Returns the program and arguments as one display string.
    #[must_use]
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Captured result of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    /// Process exit status (-1 when killed by a signal).
    pub exit_status: i32,
    /// Tail of standard output.
    pub stdout: String,
    /// Tail of standard error.
    pub stderr: String,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
}

impl CommandOutput {
    /// Creates an output with only an exit status.
    #[must_use]
    pub fn with_status(exit_status: i32) -> Self {
        Self {
            exit_status,
            ..Self::default()
        }
    }

    /// Returns true on exit status zero.
    #[must_use]
    pub fn success(&self) -> bool {
        self.exit_status == 0
    }
}

/// Runs external commands.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Executes `command` in `working_dir`, bounded by `timeout`.
    ///
    /// A nonzero exit status is a successful execution; only failures to start,
    /// wait on, or finish the process in time are errors.
    async fn execute(
        &self,
        command: &CommandSpec,
        working_dir: &Path,
        timeout: Option<Duration>,
    ) -> Result<CommandOutput, ExecutorError>;
}

/// Executor backed by `tokio::process`.
#[derive(Debug, Clone, Default)]
pub struct ProcessExecutor {
    inherit_env: bool,
}

impl ProcessExecutor {
    /// Creates an executor that inherits the parent environment.
    #[must_use]
    pub fn new() -> Self {
        Self { inherit_env: true }
    }

    /// Creates an executor that starts commands with an empty environment.
    #[must_use]
    pub fn isolated() -> Self {
        Self { inherit_env: false }
    }
}

#[async_trait]
impl CommandExecutor for ProcessExecutor {
    async fn execute(
        &self,
        command: &CommandSpec,
        working_dir: &Path,
        timeout: Option<Duration>,
    ) -> Result<CommandOutput, ExecutorError> {
        let start = Instant::now();
        let dir = match &command.working_dir {
            Some(rel) => working_dir.join(rel),
            None => working_dir.to_path_buf(),
        };

        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .current_dir(&dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if !self.inherit_env {
            cmd.env_clear();
        }
        cmd.envs(&command.env);

        debug!(command = %command.display(), dir = %dir.display(), "Spawning command");

        let child = cmd.spawn().map_err(|e| ExecutorError::Spawn {
            program: command.program.clone(),
            reason: e.to_string(),
        })?;

        // Dropping the wait future on timeout drops the child, which kills it.
        let wait = child.wait_with_output();
        let result = match timeout {
            Some(limit) => tokio::time::timeout(limit, wait).await.map_err(|_| {
                ExecutorError::Timeout {
                    program: command.program.clone(),
                    timeout_secs: limit.as_secs_f64(),
                }
            })?,
            None => wait.await,
        };

        let output = result.map_err(|e| ExecutorError::Wait {
            program: command.program.clone(),
            reason: e.to_string(),
        })?;

        Ok(CommandOutput {
            exit_status: output.status.code().unwrap_or(-1),
            stdout: capture_tail(&output.stdout),
            stderr: capture_tail(&output.stderr),
            duration_ms: u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
        })
    }
}

fn capture_tail(bytes: &[u8]) -> String {
    let start = bytes.len().saturating_sub(CAPTURE_LIMIT);
    String::from_utf8_lossy(&bytes[start..]).into_owned()
}
