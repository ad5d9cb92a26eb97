//! Execution record of a pipeline run.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::warn;
use uuid::Uuid;

use super::spec::{PipelineSpec, StageSpec};
use crate::core::{RunPhase, RunStatus, StageClassification, StagePolicy};
use crate::gate::QualityGateResult;
use crate::health::HealthCheckResult;
use crate::interfaces::{CommandOutput, ContainerHandle, ImageRef};
use crate::utils::{generate_run_id, Timestamp};

/// Collaborator-specific detail attached to a stage result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StageDetail {
    /// Captured tool output.
    Command {
        /// The captured output.
        output: CommandOutput,
    },
    /// Quality gate verdict.
    QualityGate {
        /// The verdict.
        result: QualityGateResult,
    },
    /// Health check outcome.
    HealthCheck {
        /// The outcome.
        result: HealthCheckResult,
    },
    /// A built image.
    Image {
        /// The image.
        image: ImageRef,
    },
    /// A started container.
    Container {
        /// The container.
        container: ContainerHandle,
    },
}

/// Immutable record of one stage's outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageResult {
    /// Stage name.
    pub name: String,
    /// Policy the stage ran under.
    pub policy: StagePolicy,
    /// Artifact category.
    pub category: String,
    /// Classification.
    pub classification: StageClassification,
    /// Exit status; `None` if the stage never produced one.
    pub exit_status: Option<i32>,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
    /// Workspace-relative artifact paths found after the stage.
    #[serde(default)]
    pub artifacts: Vec<PathBuf>,
    /// Why the stage ended the way it did, when that isn't obvious.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    /// Collaborator-specific detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<StageDetail>,
    /// When the stage started.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<Timestamp>,
}

impl StageResult {
    /// Creates a result for a stage that executed.
    #[must_use]
    pub fn executed(
        spec: &StageSpec,
        classification: StageClassification,
        exit_status: i32,
        duration_ms: u64,
        started_at: Timestamp,
    ) -> Self {
        Self {
            name: spec.name.clone(),
            policy: spec.policy,
            category: spec.category().to_string(),
            classification,
            exit_status: Some(exit_status),
            duration_ms,
            artifacts: Vec::new(),
            note: None,
            detail: None,
            started_at: Some(started_at),
        }
    }

    /// Creates a SKIPPED result.
    #[must_use]
    pub fn skipped(spec: &StageSpec, note: impl Into<String>) -> Self {
        Self::unexecuted(spec, StageClassification::Skipped, note)
    }

    /// Creates an ABORTED result.
    #[must_use]
    pub fn aborted(spec: &StageSpec, note: impl Into<String>) -> Self {
        Self::unexecuted(spec, StageClassification::Aborted, note)
    }

    fn unexecuted(
        spec: &StageSpec,
        classification: StageClassification,
        note: impl Into<String>,
    ) -> Self {
        Self {
            name: spec.name.clone(),
            policy: spec.policy,
            category: spec.category().to_string(),
            classification,
            exit_status: None,
            duration_ms: 0,
            artifacts: Vec::new(),
            note: Some(note.into()),
            detail: None,
            started_at: None,
        }
    }

    /// Sets the note.
    #[must_use]
    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    /// Sets the detail.
    #[must_use]
    pub fn with_detail(mut self, detail: Option<StageDetail>) -> Self {
        self.detail = detail;
        self
    }

    /// Sets the artifacts.
    #[must_use]
    pub fn with_artifacts(mut self, artifacts: Vec<PathBuf>) -> Self {
        self.artifacts = artifacts;
        self
    }

    /// Returns true if this result forces the run to FAILURE.
    #[must_use]
    pub fn fails_run(&self) -> bool {
        matches!(
            self.classification,
            StageClassification::Failed | StageClassification::Aborted
        )
    }
}

/// The record of one execution of a pipeline.
///
/// Results are append-only and ordered like the specification's stages. Once
/// the run leaves [`RunPhase::Running`] and [`RunPhase::Halted`] the record is
/// frozen apart from the finalization timestamps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineRun {
    /// Unique run identifier.
    pub run_id: Uuid,
    /// Project name.
    pub project: String,
    /// Build identifier.
    pub build_id: String,
    /// One result per resolved stage.
    pub results: Vec<StageResult>,
    /// Overall status.
    pub status: RunStatus,
    /// Current phase.
    pub phase: RunPhase,
    /// Workspace the stages ran in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace: Option<PathBuf>,
    /// Unrecoverable error that ended the run early.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// When the run started.
    pub started_at: Timestamp,
    /// When stage execution ended.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<Timestamp>,
    stage_names: Vec<String>,
}

impl PipelineRun {
    /// Creates a pending run for `spec`.
    #[must_use]
    pub fn new(spec: &PipelineSpec) -> Self {
        Self {
            run_id: generate_run_id(),
            project: spec.project.clone(),
            build_id: spec.build_id.clone(),
            results: Vec::with_capacity(spec.stages.len()),
            status: RunStatus::Success,
            phase: RunPhase::Pending,
            workspace: None,
            error: None,
            started_at: Utc::now(),
            ended_at: None,
            stage_names: spec.stages.iter().map(|s| s.name.clone()).collect(),
        }
    }

    /// Appends a result. Results must arrive in stage order, once per stage.
    pub fn record(&mut self, result: StageResult) {
        let expected = self.stage_names.get(self.results.len());
        if expected != Some(&result.name) {
            warn!(
                stage = %result.name,
                expected = ?expected,
                "Dropping out-of-order stage result"
            );
            return;
        }
        if result.fails_run() {
            self.status = RunStatus::Failure;
        }
        self.results.push(result);
    }

    /// Records an unrecoverable error and fails the run.
    pub fn fail_with(&mut self, error: impl Into<String>) {
        if self.error.is_none() {
            self.error = Some(error.into());
        }
        self.status = RunStatus::Failure;
    }

    /// Moves to `next` if the transition is legal.
    pub fn transition(&mut self, next: RunPhase) -> bool {
        if self.phase.can_transition_to(&next) {
            self.phase = next;
            true
        } else {
            warn!(from = %self.phase, to = %next, "Ignoring illegal phase transition");
            false
        }
    }

    /// Returns the names of stages that have no result yet.
    #[must_use]
    pub fn unresolved(&self) -> &[String] {
        self.stage_names.get(self.results.len()..).unwrap_or_default()
    }

    /// Returns the result for `name`.
    #[must_use]
    pub fn result(&self, name: &str) -> Option<&StageResult> {
        self.results.iter().find(|r| r.name == name)
    }

    /// Returns only the results of stages that actually ran.
    pub fn executed(&self) -> impl Iterator<Item = &StageResult> {
        self.results.iter().filter(|r| r.classification.was_executed())
    }

    /// Returns (name, classification) pairs in order.
    #[must_use]
    pub fn classifications(&self) -> Vec<(&str, StageClassification)> {
        self.results
            .iter()
            .map(|r| (r.name.as_str(), r.classification))
            .collect()
    }

    /// Counts results with the given classification.
    #[must_use]
    pub fn count(&self, classification: StageClassification) -> usize {
        self.results
            .iter()
            .filter(|r| r.classification == classification)
            .count()
    }

    /// Returns the elapsed time in milliseconds, up to the end of execution.
    #[must_use]
    pub fn duration_ms(&self) -> u64 {
        let end = self.ended_at.unwrap_or_else(Utc::now);
        u64::try_from((end - self.started_at).num_milliseconds()).unwrap_or(0)
    }

    /// Returns true once finalization has completed.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }
}
