//! Sequential stage execution with guaranteed finalization.

use chrono::Utc;
use futures::FutureExt;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, info_span, warn, Instrument};

use super::config::RunnerConfig;
use super::finalizer::{FinalizationGuard, Finalizer, RunOutcome};
use super::run::{PipelineRun, StageResult};
use super::spec::{PipelineSpec, StageAction, StageSpec};
use crate::cancellation::{CancellationToken, CleanupRegistry};
use crate::core::{RunPhase, StageClassification};
use crate::errors::{codes, ConfigSuggestions, ConfigurationError, StageError};
use crate::events::{kinds, EventSink, NoOpEventSink};
use crate::health::HealthChecker;
use crate::interfaces::{
    AnalysisSource, CheckoutProvider, CommandExecutor, ContainerRuntime, DockerCli, HttpProbe,
    LoggingMailTransport, MailTransport, ProcessExecutor,
};
use crate::notify::Notifier;
use crate::report::{resolve_artifacts, ArtifactPattern, ReportCollector};
use crate::stages::{
    BuildImageStage, CommandStage, DeployStage, HealthCheckStage, QualityGateStage, Stage,
    StageContext, StageOutcome, TIMEOUT_EXIT_STATUS,
};

type EnvLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// A stage resolved to its implementation, ready to execute.
struct PlannedStage {
    spec: StageSpec,
    stage: Arc<dyn Stage>,
    patterns: Vec<ArtifactPattern>,
    timeout: Option<Duration>,
}

/// How a stage ended, as far as forward progress is concerned.
enum Progress {
    Continue,
    Halt(String),
    Fatal(String),
}

/// Executes pipelines stage by stage.
///
/// The runner owns the collaborators stages are built from. Each call to
/// [`PipelineRunner::run`] validates the specification, runs the stages in
/// order, and finalizes exactly once on every exit path.
pub struct PipelineRunner {
    checkout: Arc<dyn CheckoutProvider>,
    executor: Arc<dyn CommandExecutor>,
    containers: Option<Arc<dyn ContainerRuntime>>,
    probe: Option<Arc<dyn HttpProbe>>,
    analysis: Option<Arc<dyn AnalysisSource>>,
    handlers: HashMap<String, Arc<dyn Stage>>,
    notifier: Notifier,
    collector: ReportCollector,
    events: Arc<dyn EventSink>,
    config: RunnerConfig,
    env: EnvLookup,
}

impl PipelineRunner {
    /// Creates a runner checking out through `checkout`.
    ///
    /// Defaults: a process executor, the docker CLI, a logging mail transport,
    /// no event sink, and [`RunnerConfig::default`].
    #[must_use]
    pub fn new(checkout: Arc<dyn CheckoutProvider>) -> Self {
        Self {
            checkout,
            executor: Arc::new(ProcessExecutor::new()),
            containers: None,
            probe: None,
            analysis: None,
            handlers: HashMap::new(),
            notifier: Notifier::new(Arc::new(LoggingMailTransport)),
            collector: ReportCollector::new(),
            events: Arc::new(NoOpEventSink),
            config: RunnerConfig::default(),
            env: Arc::new(|key| std::env::var(key).ok()),
        }
    }

    /// Sets the command executor.
    #[must_use]
    pub fn with_executor(mut self, executor: Arc<dyn CommandExecutor>) -> Self {
        self.executor = executor;
        self
    }

    /// Sets the container runtime; defaults to the docker CLI over the executor.
    #[must_use]
    pub fn with_container_runtime(mut self, runtime: Arc<dyn ContainerRuntime>) -> Self {
        self.containers = Some(runtime);
        self
    }

    /// Sets the HTTP probe used by health checks.
    #[must_use]
    pub fn with_probe(mut self, probe: Arc<dyn HttpProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Sets the analysis source used by quality gates.
    #[must_use]
    pub fn with_analysis_source(mut self, source: Arc<dyn AnalysisSource>) -> Self {
        self.analysis = Some(source);
        self
    }

    /// Sets the mail transport used for notifications.
    #[must_use]
    pub fn with_mail_transport(mut self, transport: Arc<dyn MailTransport>) -> Self {
        self.notifier = Notifier::new(transport);
        self
    }

    /// Sets the notifier.
    #[must_use]
    pub fn with_notifier(mut self, notifier: Notifier) -> Self {
        self.notifier = notifier;
        self
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Sets the runner configuration.
    #[must_use]
    pub fn with_config(mut self, config: RunnerConfig) -> Self {
        self.config = config;
        self
    }

    /// Replaces the environment lookup used by `env_equals` conditions.
    #[must_use]
    pub fn with_env_lookup<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        self.env = Arc::new(lookup);
        self
    }

    /// Registers the implementation behind `custom` stages named `handler`.
    #[must_use]
    pub fn register_handler(mut self, handler: impl Into<String>, stage: Arc<dyn Stage>) -> Self {
        self.handlers.insert(handler.into(), stage);
        self
    }

    /// Runs `spec` to completion.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigurationError`] if the specification is invalid or a
    /// stage needs a collaborator that isn't configured; no stage runs and
    /// nothing is finalized in that case. Every other failure is recorded in
    /// the returned [`RunOutcome`].
    pub async fn run(&self, spec: PipelineSpec) -> Result<RunOutcome, ConfigurationError> {
        self.run_with_cancellation(spec, Arc::new(CancellationToken::new()))
            .await
    }

    /// Runs `spec`, aborting when `cancel` is cancelled.
    ///
    /// # Errors
    ///
    /// See [`PipelineRunner::run`].
    pub async fn run_with_cancellation(
        &self,
        spec: PipelineSpec,
        cancel: Arc<CancellationToken>,
    ) -> Result<RunOutcome, ConfigurationError> {
        spec.validate()?;
        let plan = self.plan(&spec)?;

        let state = Arc::new(Mutex::new(PipelineRun::new(&spec)));
        let cleanup = Arc::new(CleanupRegistry::new());
        let run_id = state.lock().run_id;

        let guard = FinalizationGuard::arm(Finalizer {
            state: state.clone(),
            stages: Arc::new(spec.stages.clone()),
            cleanup: cleanup.clone(),
            collector: self.collector,
            notifier: self.notifier.clone(),
            recipients: spec.recipients.clone(),
            config: self.config.clone(),
            events: self.events.clone(),
        });

        let span = info_span!(
            "pipeline",
            project = %spec.project,
            build_id = %spec.build_id,
            run_id = %run_id
        );
        self.execute(&spec, &plan, &state, &cleanup, &cancel)
            .instrument(span.clone())
            .await;

        Ok(guard.complete().instrument(span).await)
    }

    /// Resolves every stage to its implementation.
    fn plan(&self, spec: &PipelineSpec) -> Result<Vec<PlannedStage>, ConfigurationError> {
        spec.stages
            .iter()
            .map(|stage_spec| {
                Ok(PlannedStage {
                    stage: self.resolve(stage_spec)?,
                    patterns: stage_spec.artifact_patterns()?,
                    timeout: stage_spec.timeout(spec.default_stage_timeout_secs),
                    spec: stage_spec.clone(),
                })
            })
            .collect()
    }

    fn resolve(&self, spec: &StageSpec) -> Result<Arc<dyn Stage>, ConfigurationError> {
        let stage: Arc<dyn Stage> = match &spec.action {
            StageAction::Command(command) => {
                Arc::new(CommandStage::new(command.clone(), self.executor.clone()))
            }
            StageAction::QualityGate {
                project_key,
                timeout_secs,
                poll_interval_secs,
                abort_pipeline,
            } => {
                let source = self
                    .analysis
                    .clone()
                    .ok_or_else(|| missing_collaborator(&spec.name, "analysis source"))?;
                Arc::new(
                    QualityGateStage::new(
                        source,
                        project_key.clone(),
                        Duration::from_secs_f64(*timeout_secs),
                        Duration::from_secs_f64(*poll_interval_secs),
                    )
                    .abort_on_failure(*abort_pipeline),
                )
            }
            StageAction::HealthCheck {
                url,
                max_attempts,
                interval_secs,
            } => Arc::new(HealthCheckStage::new(
                HealthChecker::new(self.probe_for(&spec.name)?),
                url.clone(),
                *max_attempts,
                Duration::from_secs_f64(*interval_secs),
            )),
            StageAction::BuildImage { image, context } => Arc::new(BuildImageStage::new(
                self.container_runtime(),
                image.clone(),
                context.clone(),
            )),
            StageAction::Deploy {
                image,
                container_name,
                ports,
            } => Arc::new(DeployStage::new(
                self.container_runtime(),
                image.clone(),
                container_name.clone(),
                ports.clone(),
            )),
            StageAction::Custom { handler } => self.handlers.get(handler).cloned().ok_or_else(|| {
                ConfigurationError::new(
                    codes::HANDLER,
                    format!("Stage '{}' uses unregistered handler '{handler}'", spec.name),
                )
                .with_stages(vec![spec.name.clone()])
                .with_fix_hint(ConfigSuggestions::get(codes::HANDLER).unwrap_or_default())
            })?,
        };
        Ok(stage)
    }

    fn container_runtime(&self) -> Arc<dyn ContainerRuntime> {
        self.containers
            .clone()
            .unwrap_or_else(|| Arc::new(DockerCli::new(self.executor.clone())))
    }

    #[cfg(feature = "http")]
    fn probe_for(&self, stage: &str) -> Result<Arc<dyn HttpProbe>, ConfigurationError> {
        if let Some(probe) = &self.probe {
            return Ok(probe.clone());
        }
        crate::interfaces::ReqwestProbe::new(Duration::from_secs(5))
            .map(|probe| Arc::new(probe) as Arc<dyn HttpProbe>)
            .map_err(|e| {
                missing_collaborator(stage, "HTTP probe").with_fix_hint(e.to_string())
            })
    }

    #[cfg(not(feature = "http"))]
    fn probe_for(&self, stage: &str) -> Result<Arc<dyn HttpProbe>, ConfigurationError> {
        self.probe
            .clone()
            .ok_or_else(|| missing_collaborator(stage, "HTTP probe"))
    }

    async fn execute(
        &self,
        spec: &PipelineSpec,
        plan: &[PlannedStage],
        state: &Arc<Mutex<PipelineRun>>,
        cleanup: &Arc<CleanupRegistry>,
        cancel: &Arc<CancellationToken>,
    ) {
        let run_id = state.lock().run_id;
        info!(stages = plan.len(), "Pipeline started");
        self.events
            .emit(
                kinds::PIPELINE_STARTED,
                Some(json!({
                    "run_id": run_id.to_string(),
                    "project": spec.project,
                    "build_id": spec.build_id,
                    "stages": spec.stage_names(),
                })),
            )
            .await;

        let workspace = match self.checkout.checkout().await {
            Ok(workspace) => workspace,
            Err(e) => {
                error!(error = %e, "Checkout failed");
                state.lock().fail_with(e.to_string());
                self.halt(state, "checkout failed").await;
                for planned in plan {
                    let skipped = StageResult::skipped(&planned.spec, "checkout failed");
                    self.resolve_unexecuted(state, skipped).await;
                }
                return;
            }
        };
        state.lock().workspace = Some(workspace.clone());

        let mut stopped: Option<String> = None;
        for (index, planned) in plan.iter().enumerate() {
            let name = planned.spec.name.as_str();

            if let Some(reason) = &stopped {
                let result = if cancel.is_cancelled() {
                    StageResult::aborted(&planned.spec, reason.clone())
                } else {
                    StageResult::skipped(&planned.spec, reason.clone())
                };
                self.resolve_unexecuted(state, result).await;
                continue;
            }

            if cancel.is_cancelled() {
                let reason = cancellation_note(cancel);
                self.halt(state, &reason).await;
                self.resolve_unexecuted(state, StageResult::aborted(&planned.spec, reason.clone()))
                    .await;
                stopped = Some(reason);
                continue;
            }

            if let Some(condition) = &planned.spec.when {
                let holds = {
                    let run = state.lock();
                    condition.holds(&run, |key| (self.env)(key))
                };
                if !holds {
                    debug!(stage = %name, "Condition not met");
                    let skipped = StageResult::skipped(&planned.spec, "condition not met");
                    self.resolve_unexecuted(state, skipped).await;
                    continue;
                }
            }

            state.lock().transition(RunPhase::Running(index));
            let ctx = StageContext {
                stage_name: name.to_string(),
                workspace: workspace.clone(),
                run_id,
                project: spec.project.clone(),
                build_id: spec.build_id.clone(),
                timeout: planned.timeout,
                cancel: cancel.clone(),
                cleanup: cleanup.clone(),
            };

            let span = info_span!("stage", stage = %name, index, kind = %planned.stage.kind());
            let (result, progress) = self.execute_stage(planned, &ctx).instrument(span).await;

            let classification = result.classification;
            let event = json!({
                "stage": result.name,
                "index": index,
                "classification": classification,
                "exit_status": result.exit_status,
                "duration_ms": result.duration_ms,
                "artifacts": result.artifacts.len(),
                "note": result.note,
            });
            state.lock().record(result);
            self.events.emit(kinds::STAGE_COMPLETED, Some(event)).await;

            match progress {
                Progress::Continue => {}
                Progress::Halt(reason) => {
                    self.halt(state, &reason).await;
                    stopped = Some(reason);
                }
                Progress::Fatal(error) => {
                    error!(stage = %name, error = %error, "Unrecoverable error");
                    state.lock().fail_with(error);
                    let reason = format!("internal error in stage '{name}'");
                    self.halt(state, &reason).await;
                    stopped = Some(reason);
                }
            }
        }

        state.lock().ended_at = Some(Utc::now());
    }

    async fn execute_stage(
        &self,
        planned: &PlannedStage,
        ctx: &StageContext,
    ) -> (StageResult, Progress) {
        let spec = &planned.spec;
        info!(policy = %spec.policy, "Stage started");
        self.events
            .emit(
                kinds::STAGE_STARTED,
                Some(json!({ "stage": spec.name, "kind": planned.stage.kind() })),
            )
            .await;

        let started_at = Utc::now();
        let clock = Instant::now();
        let work = AssertUnwindSafe(planned.stage.execute(ctx)).catch_unwind();
        let bounded = async {
            match planned.timeout {
                Some(limit) => tokio::time::timeout(limit, work).await.ok(),
                None => Some(work.await),
            }
        };
        let completion = tokio::select! {
            biased;
            () = ctx.cancel.cancelled() => None,
            finished = bounded => Some(finished),
        };
        let duration_ms = u64::try_from(clock.elapsed().as_millis()).unwrap_or(u64::MAX);
        let artifacts = collect_artifacts(&ctx.workspace, &planned.patterns);

        let Some(finished) = completion else {
            let note = cancellation_note(&ctx.cancel);
            warn!(stage = %spec.name, "Stage aborted");
            let mut result = StageResult::aborted(spec, note.clone()).with_artifacts(artifacts);
            result.duration_ms = duration_ms;
            result.started_at = Some(started_at);
            return (result, Progress::Halt(note));
        };

        let executed = |outcome: StageOutcome| {
            let classification = outcome.classify(spec.policy);
            let mut result = StageResult::executed(
                spec,
                classification,
                outcome.exit_status,
                duration_ms,
                started_at,
            )
            .with_detail(outcome.detail)
            .with_artifacts(artifacts.clone());
            result.note = outcome.note;
            result
        };

        let (result, progress) = match finished {
            None => {
                let limit = planned.timeout.map_or(0.0, |t| t.as_secs_f64());
                let outcome = if spec.action.is_self_bounded() {
                    StageOutcome::advisory(TIMEOUT_EXIT_STATUS)
                } else {
                    StageOutcome::exit(TIMEOUT_EXIT_STATUS)
                };
                let outcome = outcome.with_note(format!("timed out after {limit}s"));
                let result = executed(outcome);
                let progress = halt_if_failed(&result);
                (result, progress)
            }
            Some(Ok(Ok(outcome))) => {
                let result = executed(outcome);
                let progress = halt_if_failed(&result);
                (result, progress)
            }
            Some(Ok(Err(StageError::ToolCrash { reason, .. }))) => {
                warn!(stage = %spec.name, reason = %reason, "Tool could not be invoked");
                let mut result = executed(StageOutcome::exit(-1)).with_note(reason);
                result.classification = StageClassification::Failed;
                result.exit_status = None;
                (result, Progress::Halt(format!("stage '{}' could not run its tool", spec.name)))
            }
            Some(Ok(Err(e))) => {
                let mut result = executed(StageOutcome::exit(-1)).with_note(e.to_string());
                result.classification = StageClassification::Failed;
                result.exit_status = None;
                (result, Progress::Fatal(e.to_string()))
            }
            Some(Err(panic)) => {
                let message = panic_message(panic.as_ref());
                let mut result =
                    executed(StageOutcome::exit(-1)).with_note(format!("panicked: {message}"));
                result.classification = StageClassification::Failed;
                result.exit_status = None;
                (result, Progress::Fatal(format!("stage '{}' panicked: {message}", spec.name)))
            }
        };

        info!(
            classification = %result.classification,
            exit_status = ?result.exit_status,
            duration_ms,
            artifacts = result.artifacts.len(),
            "Stage completed"
        );
        (result, progress)
    }

    async fn resolve_unexecuted(&self, state: &Arc<Mutex<PipelineRun>>, result: StageResult) {
        let event = json!({
            "stage": result.name,
            "classification": result.classification,
            "note": result.note,
        });
        state.lock().record(result);
        self.events.emit(kinds::STAGE_SKIPPED, Some(event)).await;
    }

    async fn halt(&self, state: &Arc<Mutex<PipelineRun>>, reason: &str) {
        let halted = state.lock().transition(RunPhase::Halted);
        if halted {
            warn!(reason, "Pipeline halted");
            self.events
                .emit(kinds::PIPELINE_HALTED, Some(json!({ "reason": reason })))
                .await;
        }
    }
}

impl std::fmt::Debug for PipelineRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineRunner")
            .field("handlers", &self.handlers.keys().collect::<Vec<_>>())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn halt_if_failed(result: &StageResult) -> Progress {
    if result.classification.halts() {
        Progress::Halt(format!("stage '{}' failed", result.name))
    } else {
        Progress::Continue
    }
}

fn collect_artifacts(workspace: &Path, patterns: &[ArtifactPattern]) -> Vec<std::path::PathBuf> {
    if patterns.is_empty() {
        Vec::new()
    } else {
        resolve_artifacts(workspace, patterns)
    }
}

fn cancellation_note(cancel: &CancellationToken) -> String {
    match cancel.reason() {
        Some(reason) => format!("run cancelled: {reason}"),
        None => "run cancelled".to_string(),
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

fn missing_collaborator(stage: &str, what: &str) -> ConfigurationError {
    ConfigurationError::new(
        codes::COLLABORATOR,
        format!("Stage '{stage}' needs an {what}, but none is configured"),
    )
    .with_stages(vec![stage.to_string()])
    .with_fix_hint(ConfigSuggestions::get(codes::COLLABORATOR).unwrap_or_default())
}
