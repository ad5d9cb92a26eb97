//! Stage that runs an external tool.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

use super::{Stage, StageContext, StageOutcome};
use crate::errors::{ExecutorError, StageError};
use crate::interfaces::{CommandExecutor, CommandSpec};
use crate::pipeline::StageDetail;

/// Exit status recorded for a command killed by its timeout.
pub const TIMEOUT_EXIT_STATUS: i32 = 124;

/// Runs a [`CommandSpec`] in the workspace.
pub struct CommandStage {
    command: CommandSpec,
    executor: Arc<dyn CommandExecutor>,
}

impl CommandStage {
    /// Creates a stage running `command` through `executor`.
    #[must_use]
    pub fn new(command: CommandSpec, executor: Arc<dyn CommandExecutor>) -> Self {
        Self { command, executor }
    }

    fn resolved(&self, ctx: &StageContext) -> CommandSpec {
        let mut command = self.command.clone();
        command.args = command.args.iter().map(|a| ctx.expand(a)).collect();
        for value in command.env.values_mut() {
            *value = ctx.expand(value);
        }
        command
    }
}

impl std::fmt::Debug for CommandStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandStage")
            .field("command", &self.command.display())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Stage for CommandStage {
    fn kind(&self) -> &str {
        "command"
    }

    async fn execute(&self, ctx: &StageContext) -> Result<StageOutcome, StageError> {
        let command = self.resolved(ctx);
        let dir = match &command.working_dir {
            Some(sub) => ctx.workspace.join(sub),
            None => ctx.workspace.clone(),
        };

        info!(stage = %ctx.stage_name, command = %command.display(), "Running command");
        match self.executor.execute(&command, &dir, ctx.timeout).await {
            Ok(output) => Ok(StageOutcome::exit(output.exit_status)
                .with_detail(StageDetail::Command { output })),
            Err(ExecutorError::Timeout { timeout_secs, .. }) => {
                warn!(stage = %ctx.stage_name, timeout_secs, "Command timed out");
                Ok(StageOutcome::exit(TIMEOUT_EXIT_STATUS)
                    .with_note(format!("timed out after {timeout_secs}s")))
            }
            Err(e) => Err(StageError::tool_crash(&ctx.stage_name, e.to_string())),
        }
    }
}
