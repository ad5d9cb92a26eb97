//! Scripted external collaborators.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::errors::{AnalysisError, ExecutorError, MailError, PipeguardError, ProbeError};
use crate::interfaces::{
    AnalysisSource, AnalysisStatus, CheckoutProvider, CommandExecutor, CommandOutput, CommandSpec,
    HttpProbe, MailMessage, MailTransport,
};

#[derive(Debug, Clone)]
enum Script {
    Output(CommandOutput),
    SpawnFailure,
    Hang,
}

/// Command executor answering from a script instead of spawning processes.
///
/// Scripts are keyed by a prefix of the command line (`program args...`);
/// the longest matching prefix wins. Unscripted commands exit 0.
#[derive(Debug, Default)]
pub struct ScriptedExecutor {
    scripts: Mutex<Vec<(String, Script)>>,
    files: Mutex<Vec<(String, PathBuf, String)>>,
    calls: Mutex<Vec<CommandSpec>>,
}

impl ScriptedExecutor {
    /// Creates an executor where every command exits 0.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Answers commands starting with `key` with `output`.
    pub fn respond(&self, key: impl Into<String>, output: CommandOutput) {
        self.scripts.lock().push((key.into(), Script::Output(output)));
    }

    /// Answers commands starting with `key` with an exit status.
    pub fn exit_with(&self, key: impl Into<String>, exit_status: i32) {
        self.respond(key, CommandOutput::with_status(exit_status));
    }

    /// Makes commands starting with `key` fail to spawn.
    pub fn fail_to_spawn(&self, key: impl Into<String>) {
        self.scripts.lock().push((key.into(), Script::SpawnFailure));
    }

    /// Makes commands starting with `key` run until their timeout.
    pub fn hang(&self, key: impl Into<String>) {
        self.scripts.lock().push((key.into(), Script::Hang));
    }

    /// Makes commands starting with `key` write `contents` to `path`,
    /// relative to their working directory.
    pub fn writes(
        &self,
        key: impl Into<String>,
        path: impl Into<PathBuf>,
        contents: impl Into<String>,
    ) {
        self.files.lock().push((key.into(), path.into(), contents.into()));
    }

    /// Returns every command executed so far.
    #[must_use]
    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().clone()
    }

    /// Returns how many commands started with `prefix`.
    #[must_use]
    pub fn count(&self, prefix: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.display().starts_with(prefix))
            .count()
    }

    fn script_for(&self, line: &str) -> Option<Script> {
        self.scripts
            .lock()
            .iter()
            .filter(|(key, _)| line.starts_with(key.as_str()))
            .max_by_key(|(key, _)| key.len())
            .map(|(_, script)| script.clone())
    }

    fn write_files(&self, line: &str, working_dir: &Path) -> Result<(), ExecutorError> {
        for (key, path, contents) in self.files.lock().iter() {
            if !line.starts_with(key.as_str()) {
                continue;
            }
            let target = working_dir.join(path);
            let written = target
                .parent()
                .map_or(Ok(()), std::fs::create_dir_all)
                .and_then(|()| std::fs::write(&target, contents));
            written.map_err(|e| ExecutorError::Wait {
                program: line.to_string(),
                reason: e.to_string(),
            })?;
        }
        Ok(())
    }
}

#[async_trait]
impl CommandExecutor for ScriptedExecutor {
    async fn execute(
        &self,
        command: &CommandSpec,
        working_dir: &Path,
        timeout: Option<Duration>,
    ) -> Result<CommandOutput, ExecutorError> {
        self.calls.lock().push(command.clone());
        let line = command.display();

        match self.script_for(&line) {
            Some(Script::SpawnFailure) => Err(ExecutorError::Spawn {
                program: command.program.clone(),
                reason: "No such file or directory (os error 2)".to_string(),
            }),
            Some(Script::Hang) => match timeout {
                Some(limit) => {
                    tokio::time::sleep(limit).await;
                    Err(ExecutorError::Timeout {
                        program: command.program.clone(),
                        timeout_secs: limit.as_secs_f64(),
                    })
                }
                None => std::future::pending().await,
            },
            Some(Script::Output(output)) => {
                self.write_files(&line, working_dir)?;
                Ok(output)
            }
            None => {
                self.write_files(&line, working_dir)?;
                Ok(CommandOutput::with_status(0))
            }
        }
    }
}

#[derive(Debug)]
enum Replies<T> {
    Sequence(VecDeque<T>, T),
    Hang,
}

impl<T: Clone> Replies<T> {
    fn sequence(mut items: Vec<T>, fallback: T) -> Self {
        let last = items.pop().unwrap_or(fallback);
        let mut queue: VecDeque<T> = items.into();
        queue.push_back(last.clone());
        Self::Sequence(queue, last)
    }

    /// Returns the next reply; the last one repeats forever.
    fn next(&mut self) -> Option<T> {
        match self {
            Self::Sequence(queue, last) => Some(queue.pop_front().unwrap_or_else(|| last.clone())),
            Self::Hang => None,
        }
    }
}

/// Analysis source replaying a fixed sequence of statuses.
#[derive(Debug, Clone)]
pub struct StaticAnalysisSource {
    replies: Arc<Mutex<Replies<Result<AnalysisStatus, AnalysisError>>>>,
    polls: Arc<AtomicUsize>,
}

impl StaticAnalysisSource {
    fn with(replies: Replies<Result<AnalysisStatus, AnalysisError>>) -> Self {
        Self {
            replies: Arc::new(Mutex::new(replies)),
            polls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Always answers `status`.
    #[must_use]
    pub fn always(status: AnalysisStatus) -> Self {
        Self::sequence(vec![Ok(status)])
    }

    /// Answers each reply in turn, then repeats the last one.
    #[must_use]
    pub fn sequence(replies: Vec<Result<AnalysisStatus, AnalysisError>>) -> Self {
        Self::with(Replies::sequence(replies, Ok(AnalysisStatus::Pending)))
    }

    /// Never answers.
    #[must_use]
    pub fn never_responding() -> Self {
        Self::with(Replies::Hang)
    }

    /// Returns how many times the status was requested.
    #[must_use]
    pub fn polls(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AnalysisSource for StaticAnalysisSource {
    async fn fetch_status(&self, _project_key: &str) -> Result<AnalysisStatus, AnalysisError> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        let reply = self.replies.lock().next();
        match reply {
            Some(reply) => reply,
            None => std::future::pending().await,
        }
    }
}

/// HTTP probe replaying a fixed sequence of answers.
#[derive(Debug, Clone)]
pub struct ScriptedProbe {
    replies: Arc<Mutex<Replies<Result<u16, ProbeError>>>>,
    probes: Arc<AtomicUsize>,
}

impl ScriptedProbe {
    /// Answers each reply in turn, then repeats the last one.
    #[must_use]
    pub fn sequence(replies: Vec<Result<u16, ProbeError>>) -> Self {
        Self {
            replies: Arc::new(Mutex::new(Replies::sequence(replies, Ok(503)))),
            probes: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Always answers `status`.
    #[must_use]
    pub fn always(status: u16) -> Self {
        Self::sequence(vec![Ok(status)])
    }

    /// Returns how many probes were made.
    #[must_use]
    pub fn probes(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HttpProbe for ScriptedProbe {
    async fn get(&self, url: &str) -> Result<u16, ProbeError> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        let reply = self.replies.lock().next();
        reply.unwrap_or_else(|| {
            Err(ProbeError::Timeout {
                url: url.to_string(),
            })
        })
    }
}

/// Mail transport that records messages instead of sending them.
#[derive(Debug, Default)]
pub struct RecordingMailTransport {
    sent: Mutex<Vec<MailMessage>>,
    attempts: AtomicUsize,
    failure: Option<String>,
}

impl RecordingMailTransport {
    /// Creates a transport that accepts every message.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a transport that rejects every message with `reason`.
    #[must_use]
    pub fn failing(reason: impl Into<String>) -> Self {
        Self {
            failure: Some(reason.into()),
            ..Self::default()
        }
    }

    /// Returns the accepted messages.
    #[must_use]
    pub fn sent(&self) -> Vec<MailMessage> {
        self.sent.lock().clone()
    }

    /// Returns how many sends were attempted.
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MailTransport for RecordingMailTransport {
    async fn send(&self, message: &MailMessage) -> Result<(), MailError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(reason) = &self.failure {
            return Err(MailError::Delivery(reason.clone()));
        }
        self.sent.lock().push(message.clone());
        Ok(())
    }
}

/// Checkout provider that always fails.
#[derive(Debug, Clone)]
pub struct FailingCheckout {
    reason: String,
}

impl FailingCheckout {
    /// Creates a checkout failing with `reason`.
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl CheckoutProvider for FailingCheckout {
    async fn checkout(&self) -> Result<PathBuf, PipeguardError> {
        Err(PipeguardError::Checkout(self.reason.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_longest_prefix_wins() {
        let executor = ScriptedExecutor::new();
        executor.exit_with("docker", 1);
        executor.exit_with("docker build", 2);

        let dir = Path::new("/ws");
        let build = CommandSpec::new("docker").with_args(["build", "."]);
        let stop = CommandSpec::new("docker").with_args(["stop", "x"]);
        let other = CommandSpec::new("pytest");

        assert_eq!(executor.execute(&build, dir, None).await.unwrap().exit_status, 2);
        assert_eq!(executor.execute(&stop, dir, None).await.unwrap().exit_status, 1);
        assert_eq!(executor.execute(&other, dir, None).await.unwrap().exit_status, 0);
        assert_eq!(executor.count("docker"), 2);
    }

    #[tokio::test]
    async fn test_writes_files_into_working_dir() {
        let dir = tempfile::tempdir().unwrap();
        let executor = ScriptedExecutor::new();
        executor.writes("bandit", "reports/bandit.json", "{}");

        executor
            .execute(&CommandSpec::new("bandit"), dir.path(), None)
            .await
            .unwrap();
        assert!(dir.path().join("reports/bandit.json").exists());
    }

    #[tokio::test]
    async fn test_sequence_repeats_last() {
        let probe = ScriptedProbe::sequence(vec![Ok(503), Ok(200)]);
        assert_eq!(probe.get("u").await.unwrap(), 503);
        assert_eq!(probe.get("u").await.unwrap(), 200);
        assert_eq!(probe.get("u").await.unwrap(), 200);
        assert_eq!(probe.probes(), 3);
    }
}
