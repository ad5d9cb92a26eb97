//! Stage trait and implementations.
//!
//! A stage wraps one external collaborator invocation. It reports a
//! [`StageOutcome`]; the runner turns that into a classification using the
//! stage's policy.

mod command;
mod container;
mod health_check;
mod quality_gate;

pub use command::{CommandStage, TIMEOUT_EXIT_STATUS};
pub use container::{BuildImageStage, DeployStage};
pub use health_check::HealthCheckStage;
pub use quality_gate::QualityGateStage;

use async_trait::async_trait;
use std::fmt::Debug;
use std::future::Future;
use std::marker::PhantomData;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::cancellation::{CancellationToken, CleanupRegistry};
use crate::core::{StageClassification, StagePolicy};
use crate::errors::StageError;
use crate::pipeline::StageDetail;

/// Everything a stage may use while executing.
#[derive(Debug, Clone)]
pub struct StageContext {
    /// Name of the stage being executed.
    pub stage_name: String,
    /// Checked-out workspace.
    pub workspace: PathBuf,
    /// Run identifier.
    pub run_id: Uuid,
    /// Project name.
    pub project: String,
    /// Build identifier.
    pub build_id: String,
    /// Effective stage timeout.
    pub timeout: Option<Duration>,
    /// Run-wide cancellation token.
    pub cancel: Arc<CancellationToken>,
    /// Run-wide cleanup registry, drained during finalization.
    pub cleanup: Arc<CleanupRegistry>,
}

impl StageContext {
    /// Creates a standalone context with a fresh token and registry.
    #[must_use]
    pub fn new(stage_name: impl Into<String>, workspace: impl Into<PathBuf>) -> Self {
        Self {
            stage_name: stage_name.into(),
            workspace: workspace.into(),
            run_id: Uuid::nil(),
            project: String::new(),
            build_id: String::new(),
            timeout: None,
            cancel: Arc::new(CancellationToken::new()),
            cleanup: Arc::new(CleanupRegistry::new()),
        }
    }

    /// Expands `${BUILD_ID}`, `${PROJECT}` and `${RUN_ID}` in `template`.
    #[must_use]
    pub fn expand(&self, template: &str) -> String {
        template
            .replace("${BUILD_ID}", &self.build_id)
            .replace("${PROJECT}", &self.project)
            .replace("${RUN_ID}", &self.run_id.to_string())
    }
}

/// How a nonzero exit status may be escalated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Escalation {
    /// Classified by the stage's policy.
    #[default]
    PerPolicy,
    /// Never worse than WARNED, whatever the policy.
    Advisory,
}

/// What a stage reports after running its collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageOutcome {
    /// Exit status; zero means success.
    pub exit_status: i32,
    /// Escalation rule for a nonzero status.
    pub escalation: Escalation,
    /// Explanatory note for the result.
    pub note: Option<String>,
    /// Collaborator-specific detail.
    pub detail: Option<StageDetail>,
}

impl StageOutcome {
    /// A successful outcome.
    #[must_use]
    pub fn success() -> Self {
        Self::exit(0)
    }

    /// An outcome classified per policy.
    #[must_use]
    pub fn exit(exit_status: i32) -> Self {
        Self {
            exit_status,
            escalation: Escalation::PerPolicy,
            note: None,
            detail: None,
        }
    }

    /// An outcome that can at most warn.
    #[must_use]
    pub fn advisory(exit_status: i32) -> Self {
        Self {
            escalation: Escalation::Advisory,
            ..Self::exit(exit_status)
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
    pub fn with_detail(mut self, detail: StageDetail) -> Self {
        self.detail = Some(detail);
        self
    }

    /// Classifies this outcome under `policy`.
    #[must_use]
    pub fn classify(&self, policy: StagePolicy) -> StageClassification {
        match (self.escalation, policy.classify(self.exit_status)) {
            (Escalation::Advisory, StageClassification::Failed) => StageClassification::Warned,
            (_, classification) => classification,
        }
    }
}

/// Trait for pipeline stages.
///
/// Implementations must be stateless with respect to a run: everything they
/// need at execution time comes from the [`StageContext`].
#[async_trait]
pub trait Stage: Send + Sync + Debug {
    /// Short description of what the stage runs, for logs.
    fn kind(&self) -> &str;

    /// Executes the stage.
    ///
    /// A nonzero exit status is an `Ok` outcome. `Err` is reserved for a
    /// collaborator that could not be invoked at all, or an internal error.
    async fn execute(&self, ctx: &StageContext) -> Result<StageOutcome, StageError>;
}

/// An async function-based stage, used for custom handlers.
pub struct FnStage<F, Fut>
where
    F: Fn(StageContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<StageOutcome, StageError>> + Send + 'static,
{
    kind: String,
    func: F,
    _phantom: PhantomData<fn() -> Fut>,
}

impl<F, Fut> FnStage<F, Fut>
where
    F: Fn(StageContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<StageOutcome, StageError>> + Send + 'static,
{
    /// Creates a new function-based stage.
    pub fn new(kind: impl Into<String>, func: F) -> Self {
        Self {
            kind: kind.into(),
            func,
            _phantom: PhantomData,
        }
    }
}

impl<F, Fut> Debug for FnStage<F, Fut>
where
    F: Fn(StageContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<StageOutcome, StageError>> + Send + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnStage").field("kind", &self.kind).finish()
    }
}

#[async_trait]
impl<F, Fut> Stage for FnStage<F, Fut>
where
    F: Fn(StageContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<StageOutcome, StageError>> + Send + 'static,
{
    fn kind(&self) -> &str {
        &self.kind
    }

    async fn execute(&self, ctx: &StageContext) -> Result<StageOutcome, StageError> {
        (self.func)(ctx.clone()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_classification() {
        assert_eq!(
            StageOutcome::success().classify(StagePolicy::FailFast),
            StageClassification::Succeeded
        );
        assert_eq!(
            StageOutcome::exit(2).classify(StagePolicy::FailFast),
            StageClassification::Failed
        );
        assert_eq!(
            StageOutcome::advisory(1).classify(StagePolicy::FailFast),
            StageClassification::Warned
        );
        assert_eq!(
            StageOutcome::advisory(1).classify(StagePolicy::IgnoreError),
            StageClassification::Succeeded
        );
    }

    #[test]
    fn test_context_expand() {
        let mut ctx = StageContext::new("build", "/tmp");
        ctx.project = "webapp".to_string();
        ctx.build_id = "42".to_string();
        assert_eq!(ctx.expand("${PROJECT}:${BUILD_ID}"), "webapp:42");
        assert_eq!(ctx.expand("plain"), "plain");
    }

    #[tokio::test]
    async fn test_fn_stage() {
        let stage = FnStage::new("zap", |ctx: StageContext| async move {
            Ok::<_, StageError>(StageOutcome::exit(3).with_note(ctx.stage_name))
        });

        assert_eq!(stage.kind(), "zap");
        let outcome = stage.execute(&StageContext::new("dast", "/tmp")).await.unwrap();
        assert_eq!(outcome.exit_status, 3);
        assert_eq!(outcome.note.as_deref(), Some("dast"));
    }
}
