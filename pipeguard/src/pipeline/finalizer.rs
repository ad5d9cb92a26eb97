//! Always-run finalization: cleanup, report collection, notification.

use chrono::Utc;
use futures::FutureExt;
use parking_lot::Mutex;
use serde_json::json;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn, Instrument};

use super::config::RunnerConfig;
use super::run::{PipelineRun, StageResult};
use super::spec::StageSpec;
use crate::cancellation::CleanupRegistry;
use crate::core::RunPhase;
use crate::errors::{FinalizationWarning, PipeguardError};
use crate::events::{kinds, EventSink};
use crate::notify::{Delivery, Notifier};
use crate::report::{ArchiveManifest, ReportCollector};

/// Result of a finished run: the frozen record plus what finalization produced.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// The frozen run.
    pub run: PipelineRun,
    /// Where the reports went.
    pub manifest: ArchiveManifest,
    /// Secondary problems during finalization. They never change the status.
    pub warnings: Vec<FinalizationWarning>,
}

impl RunOutcome {
    /// Returns the unrecoverable error that ended the run, if any.
    #[must_use]
    pub fn internal_error(&self) -> Option<&str> {
        self.run.error.as_deref()
    }

    /// Converts a recorded unrecoverable error into an `Err`.
    ///
    /// # Errors
    ///
    /// Returns [`PipeguardError::Internal`] if the run ended on an internal
    /// error or a failed checkout.
    pub fn into_result(self) -> Result<PipelineRun, PipeguardError> {
        match self.run.error {
            Some(error) => Err(PipeguardError::Internal(error)),
            None => Ok(self.run),
        }
    }
}

/// Everything finalization needs, detached from the runner's borrow.
#[derive(Clone)]
pub(crate) struct Finalizer {
    pub(crate) state: Arc<Mutex<PipelineRun>>,
    pub(crate) stages: Arc<Vec<StageSpec>>,
    pub(crate) cleanup: Arc<CleanupRegistry>,
    pub(crate) collector: ReportCollector,
    pub(crate) notifier: Notifier,
    pub(crate) recipients: Vec<String>,
    pub(crate) config: RunnerConfig,
    pub(crate) events: Arc<dyn EventSink>,
}

impl Finalizer {
    /// Marks every stage without a result as ABORTED.
    fn abort_unresolved(&self, reason: &str) {
        let mut run = self.state.lock();
        let resolved = run.results.len();
        for spec in self.stages.iter().skip(resolved) {
            run.record(StageResult::aborted(spec, reason));
        }
    }

    fn archive_dir(&self, run: &PipelineRun) -> PathBuf {
        self.config
            .archive_dir
            .join(&run.project)
            .join(run.run_id.to_string())
    }

    async fn run(self) -> RunOutcome {
        self.abort_unresolved("run ended before the stage was resolved");
        {
            let mut run = self.state.lock();
            if run.ended_at.is_none() {
                run.ended_at = Some(Utc::now());
            }
            run.transition(RunPhase::Finalizing);
        }

        let mut warnings = Vec::new();
        for (name, reason) in self.cleanup.run_all(self.config.cleanup_timeout()).await {
            warnings.push(FinalizationWarning::Cleanup { name, reason });
        }

        let snapshot = self.state.lock().clone();
        let manifest = self.collect(&snapshot, &mut warnings).await;
        self.dispatch(&snapshot, &manifest, &mut warnings).await;

        let run = {
            let mut run = self.state.lock();
            let status = run.status;
            run.transition(RunPhase::Terminal(status));
            run.clone()
        };

        info!(
            status = %run.status,
            warnings = warnings.len(),
            duration_ms = run.duration_ms(),
            "Pipeline finalized"
        );
        self.events
            .emit(
                kinds::PIPELINE_FINALIZED,
                Some(json!({
                    "run_id": run.run_id.to_string(),
                    "status": run.status,
                    "warnings": warnings.len(),
                })),
            )
            .await;

        RunOutcome {
            run,
            manifest,
            warnings,
        }
    }

    async fn collect(
        &self,
        run: &PipelineRun,
        warnings: &mut Vec<FinalizationWarning>,
    ) -> ArchiveManifest {
        let out_dir = self.archive_dir(run);
        let collector = self.collector;
        let (frozen, dir) = (run.clone(), out_dir.clone());
        let task = tokio::task::spawn_blocking(move || collector.collect(&frozen, &dir));

        let failure = match tokio::time::timeout(self.config.finalize_timeout(), task).await {
            Ok(Ok(Ok(manifest))) => {
                self.events
                    .emit(
                        kinds::REPORTS_COLLECTED,
                        Some(json!({
                            "archived": manifest.entries.len(),
                            "missing": manifest.missing.len(),
                            "root": manifest.root,
                        })),
                    )
                    .await;
                return manifest;
            }
            Ok(Ok(Err(e))) => e.to_string(),
            Ok(Err(join)) => format!("collector task failed: {join}"),
            Err(_) => format!("timed out after {:?}", self.config.finalize_timeout()),
        };

        warn!(error = %failure, "Report collection failed");
        warnings.push(FinalizationWarning::Collection(failure));
        ArchiveManifest::new(out_dir)
    }

    async fn dispatch(
        &self,
        run: &PipelineRun,
        manifest: &ArchiveManifest,
        warnings: &mut Vec<FinalizationWarning>,
    ) {
        let notify =
            AssertUnwindSafe(self.notifier.notify(run, manifest, &self.recipients)).catch_unwind();

        let failure = match tokio::time::timeout(self.config.finalize_timeout(), notify).await {
            Ok(Ok(Ok(Delivery::Sent(message)))) => {
                self.events
                    .emit(
                        kinds::NOTIFICATION_SENT,
                        Some(json!({ "recipients": message.to, "subject": message.subject })),
                    )
                    .await;
                return;
            }
            Ok(Ok(Ok(Delivery::Skipped))) => return,
            Ok(Ok(Err(e))) => e.to_string(),
            Ok(Err(_panic)) => "notifier panicked".to_string(),
            Err(_) => format!("timed out after {:?}", self.config.finalize_timeout()),
        };

        warn!(error = %failure, "Notification failed");
        warnings.push(FinalizationWarning::Notification(failure));
    }
}

/// Guarantees finalization runs exactly once, even if the run future is dropped.
///
/// `complete` hands finalization to a spawned task, so dropping the caller
/// while it waits doesn't interrupt it. If the guard itself is dropped before
/// `complete`, `Drop` aborts the unresolved stages and spawns finalization on
/// the current runtime.
pub(crate) struct FinalizationGuard {
    finalizer: Finalizer,
    armed: bool,
}

impl FinalizationGuard {
    pub(crate) fn arm(finalizer: Finalizer) -> Self {
        Self {
            finalizer,
            armed: true,
        }
    }

    pub(crate) async fn complete(mut self) -> RunOutcome {
        self.armed = false;
        let finalizer = self.finalizer.clone();
        let handle = tokio::spawn(finalizer.run().in_current_span());

        match handle.await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(error = %e, "Finalization task failed");
                let run = self.finalizer.state.lock().clone();
                let manifest = ArchiveManifest::new(self.finalizer.archive_dir(&run));
                RunOutcome {
                    run,
                    manifest,
                    warnings: vec![FinalizationWarning::Collection(format!(
                        "finalization task failed: {e}"
                    ))],
                }
            }
        }
    }
}

impl Drop for FinalizationGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        self.armed = false;
        let unresolved = self.finalizer.state.lock().unresolved().to_vec();
        self.finalizer.events.try_emit(
            kinds::PIPELINE_HALTED,
            Some(json!({ "reason": "run dropped", "unresolved": unresolved })),
        );
        self.finalizer.abort_unresolved("run dropped before the stage completed");

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!("Run dropped mid-flight; finalizing in the background");
                let finalizer = self.finalizer.clone();
                handle.spawn(
                    async move {
                        finalizer.run().await;
                    }
                    .in_current_span(),
                );
            }
            Err(_) => error!("Run dropped outside a tokio runtime; finalization skipped"),
        }
    }
}
