//! Run summaries and their dispatch to recipients.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::core::{RunStatus, StageClassification};
use crate::errors::MailError;
use crate::gate::QualityGateResult;
use crate::health::HealthCheckResult;
use crate::interfaces::{MailMessage, MailTransport};
use crate::pipeline::{PipelineRun, StageDetail};
use crate::report::ArchiveManifest;
use crate::utils::{format_duration_ms, Timestamp};

/// File name of the summary inside the archive directory.
pub const SUMMARY_FILE: &str = "summary.json";

/// One stage line of a summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageLine {
    /// Stage name.
    pub name: String,
    /// Classification.
    pub classification: StageClassification,
    /// Exit status, if the stage produced one.
    pub exit_status: Option<i32>,
    /// Duration in milliseconds.
    pub duration_ms: u64,
    /// Number of artifacts found.
    pub artifacts: usize,
    /// Explanatory note.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Human-facing digest of a finished run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Project name.
    pub project: String,
    /// Build identifier.
    pub build_id: String,
    /// Run identifier.
    pub run_id: Uuid,
    /// Overall status.
    pub status: RunStatus,
    /// Run start.
    pub started_at: Timestamp,
    /// End of stage execution.
    pub ended_at: Option<Timestamp>,
    /// Total duration in milliseconds.
    pub duration_ms: u64,
    /// Per-stage lines in order.
    pub stages: Vec<StageLine>,
    /// Archived artifact counts per category.
    pub artifacts_by_category: BTreeMap<String, usize>,
    /// Listed artifacts that could not be archived.
    pub missing_artifacts: usize,
    /// Quality gate verdict, if a gate ran.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality_gate: Option<QualityGateResult>,
    /// Health check outcome, if one ran.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_check: Option<HealthCheckResult>,
    /// Internal error, if the run ended on one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Archive directory.
    pub archive: PathBuf,
}

impl RunSummary {
    /// Builds a summary from a frozen run and its archive manifest.
    #[must_use]
    pub fn new(run: &PipelineRun, manifest: &ArchiveManifest) -> Self {
        let mut quality_gate = None;
        let mut health_check = None;
        for result in &run.results {
            match &result.detail {
                Some(StageDetail::QualityGate { result }) => quality_gate = Some(*result),
                Some(StageDetail::HealthCheck { result }) => health_check = Some(*result),
                _ => {}
            }
        }

        Self {
            project: run.project.clone(),
            build_id: run.build_id.clone(),
            run_id: run.run_id,
            status: run.status,
            started_at: run.started_at,
            ended_at: run.ended_at,
            duration_ms: run.duration_ms(),
            stages: run
                .results
                .iter()
                .map(|r| StageLine {
                    name: r.name.clone(),
                    classification: r.classification,
                    exit_status: r.exit_status,
                    duration_ms: r.duration_ms,
                    artifacts: r.artifacts.len(),
                    note: r.note.clone(),
                })
                .collect(),
            artifacts_by_category: manifest.counts_by_category(),
            missing_artifacts: manifest.missing.len(),
            quality_gate,
            health_check,
            error: run.error.clone(),
            archive: manifest.root.clone(),
        }
    }

    /// Returns the mail subject, e.g. `[FAILURE] webapp #12`.
    #[must_use]
    pub fn subject(&self) -> String {
        format!("[{}] {} #{}", self.status, self.project, self.build_id)
    }

    /// Renders the plain-text mail body.
    #[must_use]
    pub fn render_body(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Project: {}", self.project);
        let _ = writeln!(out, "Build:   #{} (run {})", self.build_id, self.run_id);
        let _ = writeln!(out, "Status:  {}", self.status);
        let _ = writeln!(out, "Started: {}", self.started_at.to_rfc3339());
        let _ = writeln!(out, "Took:    {}", format_duration_ms(self.duration_ms));
        if let Some(error) = &self.error {
            let _ = writeln!(out, "Error:   {error}");
        }

        let width = self.stages.iter().map(|s| s.name.len()).max().unwrap_or(0);
        out.push_str("\nStages:\n");
        for stage in &self.stages {
            let exit = stage
                .exit_status
                .map_or_else(|| "-".to_string(), |s| format!("exit={s}"));
            let _ = write!(
                out,
                "  {:width$}  {:9}  {:8}  {:>7}",
                stage.name,
                stage.classification.to_string(),
                exit,
                format_duration_ms(stage.duration_ms),
            );
            if let Some(note) = &stage.note {
                let _ = write!(out, "  ({note})");
            }
            out.push('\n');
        }

        if let Some(gate) = self.quality_gate {
            let _ = writeln!(out, "\nQuality gate: {gate}");
        }
        if let Some(health) = &self.health_check {
            let _ = writeln!(
                out,
                "Health check: {} after {} attempt(s)",
                if health.ready { "ready" } else { "not ready" },
                health.attempts
            );
        }

        out.push_str("\nReports:\n");
        if self.artifacts_by_category.is_empty() {
            out.push_str("  none\n");
        }
        for (category, count) in &self.artifacts_by_category {
            let _ = writeln!(out, "  {category}: {count}");
        }
        if self.missing_artifacts > 0 {
            let _ = writeln!(out, "  missing: {}", self.missing_artifacts);
        }
        let _ = writeln!(out, "Archive: {}", self.archive.display());
        out
    }
}

/// What the notifier did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// The message was handed to the transport.
    Sent(MailMessage),
    /// No recipients were configured.
    Skipped,
}

/// Sends one summary message per run.
#[derive(Clone)]
pub struct Notifier {
    transport: Arc<dyn MailTransport>,
    attach_reports: bool,
}

impl Notifier {
    /// Creates a notifier that attaches archived reports.
    #[must_use]
    pub fn new(transport: Arc<dyn MailTransport>) -> Self {
        Self {
            transport,
            attach_reports: true,
        }
    }

    /// Controls whether archived reports are attached.
    #[must_use]
    pub fn with_attachments(mut self, attach: bool) -> Self {
        self.attach_reports = attach;
        self
    }

    /// Summarizes `run`, writes `summary.json` and dispatches the message.
    ///
    /// Writing the summary file is best effort.
    ///
    /// # Errors
    ///
    /// Returns the transport's error; the caller logs it as a warning.
    pub async fn notify(
        &self,
        run: &PipelineRun,
        manifest: &ArchiveManifest,
        recipients: &[String],
    ) -> Result<Delivery, MailError> {
        let summary = RunSummary::new(run, manifest);
        let summary_path = manifest.root.join(SUMMARY_FILE);
        match serde_json::to_string_pretty(&summary) {
            Ok(json) => {
                if let Err(e) = tokio::fs::write(&summary_path, json).await {
                    warn!(
                        path = %summary_path.display(),
                        error = %e,
                        "Could not write run summary"
                    );
                }
            }
            Err(e) => warn!(error = %e, "Could not serialize run summary"),
        }

        if recipients.is_empty() {
            warn!(project = %run.project, "No notification recipients configured; skipping mail");
            return Ok(Delivery::Skipped);
        }

        let mut attachments = Vec::new();
        if self.attach_reports {
            attachments.extend(manifest.entries.iter().map(|e| manifest.root.join(&e.archived)));
        }

        let message = MailMessage {
            to: recipients.to_vec(),
            subject: summary.subject(),
            body: summary.render_body(),
            attachments,
        };
        self.transport.send(&message).await?;
        info!(recipients = recipients.len(), subject = %message.subject, "Run summary sent");
        Ok(Delivery::Sent(message))
    }
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier")
            .field("attach_reports", &self.attach_reports)
            .finish_non_exhaustive()
    }
}
