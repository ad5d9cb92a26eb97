//! Error types for the pipeguard runtime.
//!
//! Stage-level tool errors never escape the runner: they are folded into the
//! stage's result. Only configuration errors and unrecoverable internal errors
//! propagate to the caller.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// The main error type for pipeguard operations.
#[derive(Debug, Error)]
pub enum PipeguardError {
    /// The pipeline specification is invalid.
    #[error("{0}")]
    Configuration(#[from] ConfigurationError),

    /// The source checkout could not be prepared.
    #[error("Checkout failed: {0}")]
    Checkout(String),

    /// An unrecoverable internal error.
    #[error("Internal error: {0}")]
    Internal(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Error raised when a pipeline specification is rejected before any stage runs.
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
#[error("[{code}] {message}")]
pub struct ConfigurationError {
    /// Stable error code (e.g., "CONFIG-DUPLICATE").
    pub code: String,
    /// Human readable message.
    pub message: String,
    /// The stages involved in the error.
    #[serde(default)]
    pub stages: Vec<String>,
    /// Hint for fixing the error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fix_hint: Option<String>,
}

impl ConfigurationError {
    /// Creates a new configuration error.
    #[must_use]
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            stages: Vec::new(),
            fix_hint: None,
        }
    }

    /// Sets the stages involved.
    #[must_use]
    pub fn with_stages(mut self, stages: Vec<String>) -> Self {
        self.stages = stages;
        self
    }

    /// Sets the fix hint.
    #[must_use]
    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }

    /// Pipeline has no stages.
    #[must_use]
    pub fn empty_pipeline() -> Self {
        Self::new(codes::EMPTY, "Pipeline has no stages")
            .with_fix_hint(ConfigSuggestions::get(codes::EMPTY).unwrap_or_default())
    }

    /// Two stages share a name.
    #[must_use]
    pub fn duplicate_stage(name: &str) -> Self {
        Self::new(codes::DUPLICATE, format!("Stage name '{name}' is declared more than once"))
            .with_stages(vec![name.to_string()])
            .with_fix_hint(ConfigSuggestions::get(codes::DUPLICATE).unwrap_or_default())
    }

    /// A health check was configured with zero attempts.
    #[must_use]
    pub fn zero_attempts(stage: &str) -> Self {
        Self::new(
            codes::HEALTH_ATTEMPTS,
            format!("Health check '{stage}' must allow at least one attempt"),
        )
        .with_stages(vec![stage.to_string()])
        .with_fix_hint(ConfigSuggestions::get(codes::HEALTH_ATTEMPTS).unwrap_or_default())
    }

    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("code".to_string(), serde_json::json!(self.code));
        map.insert("message".to_string(), serde_json::json!(self.message));
        map.insert("stages".to_string(), serde_json::json!(self.stages));
        if let Some(ref hint) = self.fix_hint {
            map.insert("fix_hint".to_string(), serde_json::json!(hint));
        }
        map
    }
}

/// Stable configuration error codes.
pub mod codes {
    /// Pipeline has no stages.
    pub const EMPTY: &str = "CONFIG-EMPTY";
    /// Duplicate stage name.
    pub const DUPLICATE: &str = "CONFIG-DUPLICATE";
    /// Empty or whitespace-only name.
    pub const NAME: &str = "CONFIG-NAME";
    /// Health check with zero attempts.
    pub const HEALTH_ATTEMPTS: &str = "CONFIG-HEALTH-ATTEMPTS";
    /// Condition references an unknown or later stage.
    pub const CONDITION: &str = "CONFIG-CONDITION";
    /// A zero timeout or interval.
    pub const TIMEOUT: &str = "CONFIG-TIMEOUT";
    /// A custom stage handler is not registered.
    pub const HANDLER: &str = "CONFIG-HANDLER";
    /// An artifact pattern escapes the workspace or does not compile.
    pub const ARTIFACT: &str = "CONFIG-ARTIFACT";
    /// A stage needs a collaborator the runner was not given.
    pub const COLLABORATOR: &str = "CONFIG-COLLABORATOR";
}

/// Provides default suggestions for configuration error codes.
pub struct ConfigSuggestions;

impl ConfigSuggestions {
    /// Gets a suggestion for a given error code.
    #[must_use]
    pub fn get(code: &str) -> Option<&'static str> {
        match code {
            codes::EMPTY => Some("Add at least one stage to the pipeline."),
            codes::DUPLICATE => {
                Some("Stage names must be unique within a pipeline; rename one of them.")
            }
            codes::NAME => Some(
                "Give the pipeline and every stage a non-blank name without path separators.",
            ),
            codes::HEALTH_ATTEMPTS => Some("Set max_attempts to 1 or more."),
            codes::CONDITION => Some(
                "A `when` condition may only reference a stage declared earlier in the pipeline.",
            ),
            codes::TIMEOUT => Some("Timeouts and poll intervals must be greater than zero."),
            codes::HANDLER => Some("Register the handler on the runner before calling run()."),
            codes::ARTIFACT => Some("Use a relative glob such as `reports/*.json`."),
            codes::COLLABORATOR => Some(concat!(
                "Configure the runner with the container runtime, HTTP probe ",
                "or analysis source the stage uses."
            )),
            _ => None,
        }
    }
}

/// Errors a stage reports instead of an outcome.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StageError {
    /// The external collaborator could not be invoked at all.
    #[error("Tool could not be started for stage '{stage}': {reason}")]
    ToolCrash {
        /// The stage name.
        stage: String,
        /// Why the tool could not start.
        reason: String,
    },

    /// An unrecoverable internal error.
    #[error("Internal error in stage '{stage}': {reason}")]
    Internal {
        /// The stage name.
        stage: String,
        /// The error message.
        reason: String,
    },

    /// A configuration problem detected while the stage was running.
    #[error("{0}")]
    Configuration(ConfigurationError),
}

impl StageError {
    /// Creates a tool crash error.
    #[must_use]
    pub fn tool_crash(stage: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ToolCrash {
            stage: stage.into(),
            reason: reason.into(),
        }
    }

    /// Creates an internal error.
    #[must_use]
    pub fn internal(stage: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Internal {
            stage: stage.into(),
            reason: reason.into(),
        }
    }

    /// Returns true if this error is unrecoverable for the whole run.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Internal { .. } | Self::Configuration(_))
    }
}

/// Errors from the command executor.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ExecutorError {
    /// The process could not be spawned (missing binary, permission).
    #[error("Failed to spawn '{program}': {reason}")]
    Spawn {
        /// The program that was invoked.
        program: String,
        /// The OS error.
        reason: String,
    },

    /// The process did not finish in time and was killed.
    #[error("'{program}' timed out after {timeout_secs}s")]
    Timeout {
        /// The program that was invoked.
        program: String,
        /// The timeout in seconds.
        timeout_secs: f64,
    },

    /// Waiting on the process failed.
    #[error("Process error for '{program}': {reason}")]
    Wait {
        /// The program that was invoked.
        program: String,
        /// The error.
        reason: String,
    },
}

/// Errors from an HTTP probe.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProbeError {
    /// The endpoint could not be reached.
    #[error("Connection to {url} failed: {reason}")]
    Connect {
        /// The probed URL.
        url: String,
        /// The failure reason.
        reason: String,
    },

    /// The probe did not answer in time.
    #[error("Probe of {url} timed out")]
    Timeout {
        /// The probed URL.
        url: String,
    },
}

/// Errors from the analysis report source.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AnalysisError {
    /// The analysis server could not be reached.
    #[error("Analysis source unavailable: {0}")]
    Unavailable(String),

    /// The response could not be understood.
    #[error("Malformed analysis response: {0}")]
    Malformed(String),
}

/// Errors from the container runtime.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ContainerError {
    /// The runtime command could not be executed.
    #[error("{0}")]
    Executor(#[from] ExecutorError),

    /// The runtime reported a nonzero status.
    #[error("'{operation}' exited with status {exit_status}: {stderr}")]
    Failed {
        /// The runtime operation (build, run, stop, rm).
        operation: String,
        /// Exit status.
        exit_status: i32,
        /// Captured standard error.
        stderr: String,
    },
}

/// Errors from the mail transport.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MailError {
    /// The message could not be delivered.
    #[error("Mail delivery failed: {0}")]
    Delivery(String),
}

/// A secondary warning raised during the always-run finalization phase.
///
/// These never change the overall status of a run.
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum FinalizationWarning {
    /// A registered cleanup action failed or timed out.
    #[error("Cleanup '{name}' failed: {reason}")]
    Cleanup {
        /// The cleanup name.
        name: String,
        /// The failure reason.
        reason: String,
    },

    /// Report collection failed or timed out.
    #[error("Report collection failed: {0}")]
    Collection(String),

    /// Notification failed or timed out.
    #[error("Notification failed: {0}")]
    Notification(String),
}
