//! Stage that waits for the static-analysis quality gate.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use super::{Stage, StageContext, StageOutcome};
use crate::errors::StageError;
use crate::gate::{QualityGate, QualityGateResult};
use crate::interfaces::AnalysisSource;
use crate::pipeline::StageDetail;

/// Evaluates a [`QualityGate`].
///
/// PASS succeeds. FAIL warns unless `abort_pipeline` is set, in which case it
/// is classified by the stage policy. TIMEOUT always warns.
pub struct QualityGateStage {
    source: Arc<dyn AnalysisSource>,
    project_key: String,
    timeout: Duration,
    poll_interval: Duration,
    abort_pipeline: bool,
}

impl QualityGateStage {
    /// Creates a gate stage.
    #[must_use]
    pub fn new(
        source: Arc<dyn AnalysisSource>,
        project_key: impl Into<String>,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Self {
        Self {
            source,
            project_key: project_key.into(),
            timeout,
            poll_interval,
            abort_pipeline: false,
        }
    }

    /// Escalates a FAIL verdict per policy.
    #[must_use]
    pub fn abort_on_failure(mut self, abort: bool) -> Self {
        self.abort_pipeline = abort;
        self
    }
}

impl std::fmt::Debug for QualityGateStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QualityGateStage")
            .field("project_key", &self.project_key)
            .field("timeout", &self.timeout)
            .field("abort_pipeline", &self.abort_pipeline)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Stage for QualityGateStage {
    fn kind(&self) -> &str {
        "quality_gate"
    }

    async fn execute(&self, ctx: &StageContext) -> Result<StageOutcome, StageError> {
        let verdict = QualityGate::new(self.source.clone(), ctx.expand(&self.project_key))
            .with_poll_interval(self.poll_interval)
            .with_cancellation(ctx.cancel.clone())
            .evaluate(self.timeout)
            .await;

        let outcome = match verdict {
            QualityGateResult::Pass => StageOutcome::success(),
            QualityGateResult::Fail if self.abort_pipeline => StageOutcome::exit(1),
            QualityGateResult::Fail | QualityGateResult::Timeout => StageOutcome::advisory(1),
        };
        let outcome = if verdict == QualityGateResult::Pass {
            outcome
        } else {
            outcome.with_note(format!("quality gate {verdict}"))
        };
        Ok(outcome.with_detail(StageDetail::QualityGate { result: verdict }))
    }
}
