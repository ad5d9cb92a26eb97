//! End-to-end runs against scripted collaborators.

use pretty_assertions::assert_eq;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use super::{
    PipelineBuilder, PipelineRunner, RunOutcome, RunnerConfig, StageAction, StageCondition,
    StageSpec,
};
use crate::cancellation::CancellationToken;
use crate::core::{RunStatus, StageClassification as SC, StagePolicy};
use crate::errors::{codes, FinalizationWarning, StageError};
use crate::events::{kinds, CollectingEventSink};
use crate::interfaces::{AnalysisStatus, CommandSpec, LocalCheckout, PortMapping};
use crate::notify::{RunSummary, SUMMARY_FILE};
use crate::report::MANIFEST_FILE;
use crate::stages::{FnStage, StageOutcome, TIMEOUT_EXIT_STATUS};
use crate::testing::{
    assert_classifications, assert_run_status, assert_stage, FailingCheckout, FailingStage,
    PanickingStage, RecordingMailTransport, RecordingStage, ScriptedExecutor, ScriptedProbe,
    SlowStage, StaticAnalysisSource,
};

struct Harness {
    workspace: TempDir,
    archive: TempDir,
    executor: Arc<ScriptedExecutor>,
    mail: Arc<RecordingMailTransport>,
    events: Arc<CollectingEventSink>,
}

impl Harness {
    fn new() -> Self {
        Self::with_mail(RecordingMailTransport::new())
    }

    fn with_mail(mail: RecordingMailTransport) -> Self {
        Self {
            workspace: TempDir::new().unwrap(),
            archive: TempDir::new().unwrap(),
            executor: Arc::new(ScriptedExecutor::new()),
            mail: Arc::new(mail),
            events: Arc::new(CollectingEventSink::new()),
        }
    }

    fn runner(&self) -> PipelineRunner {
        PipelineRunner::new(Arc::new(LocalCheckout::new(self.workspace.path())))
            .with_executor(self.executor.clone())
            .with_mail_transport(self.mail.clone())
            .with_event_sink(self.events.clone())
            .with_config(RunnerConfig::default().with_archive_dir(self.archive.path()))
    }

    fn finalized(&self) -> usize {
        self.events.events_of_type(kinds::PIPELINE_FINALIZED).len()
    }

    async fn wait_for_finalization(&self) {
        for _ in 0..200 {
            if self.finalized() > 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

fn cmd(name: &str, program: &str) -> StageSpec {
    StageSpec::command(name, CommandSpec::new(program))
}

fn pipeline() -> PipelineBuilder {
    PipelineBuilder::new("webapp")
        .build_id("42")
        .recipient("dev@example.com")
}

fn assert_finalized_once(harness: &Harness, outcome: &RunOutcome) {
    assert!(outcome.run.is_terminal());
    assert_eq!(harness.finalized(), 1);
    assert_eq!(harness.mail.attempts(), 1);
}

#[tokio::test]
async fn test_fail_fast_halts_and_skips_the_rest() {
    let harness = Harness::new();
    harness.executor.exit_with("pytest", 1);
    harness.executor.exit_with("bandit", 2);

    let spec = pipeline()
        .stage(cmd("install", "pip"))
        .unwrap()
        .stage(cmd("test", "pytest").with_policy(StagePolicy::WarnOnError))
        .unwrap()
        .stage(cmd("scan", "bandit"))
        .unwrap()
        .stage(cmd("package", "tar"))
        .unwrap()
        .build()
        .unwrap();

    let outcome = harness.runner().run(spec).await.unwrap();

    assert_classifications(
        &outcome.run,
        &[
            ("install", SC::Succeeded),
            ("test", SC::Warned),
            ("scan", SC::Failed),
            ("package", SC::Skipped),
        ],
    );
    assert_run_status(&outcome.run, RunStatus::Failure);
    assert_eq!(outcome.run.result("scan").unwrap().exit_status, Some(2));
    assert_eq!(outcome.run.executed().count(), 3);
    assert_eq!(harness.executor.count("tar"), 0);
    assert!(outcome.run.error.is_none());
    assert_finalized_once(&harness, &outcome);

    let sent = harness.mail.sent();
    assert_eq!(sent[0].subject, "[FAILURE] webapp #42");
    assert_eq!(harness.events.events_of_type(kinds::PIPELINE_HALTED).len(), 1);
}

#[tokio::test]
async fn test_failed_scan_skips_deploy_and_notifies_once() {
    let harness = Harness::new();
    harness.executor.exit_with("bandit", 1);

    let spec = pipeline()
        .stage(cmd("install", "pip").with_policy(StagePolicy::WarnOnError))
        .unwrap()
        .stage(cmd("test", "pytest").with_policy(StagePolicy::WarnOnError))
        .unwrap()
        .stage(cmd("scan", "bandit"))
        .unwrap()
        .stage(cmd("deploy", "docker"))
        .unwrap()
        .stage(cmd("dast", "zap-baseline").with_policy(StagePolicy::WarnOnError))
        .unwrap()
        .build()
        .unwrap();

    let outcome = harness.runner().run(spec).await.unwrap();

    let expected = [
        ("install", SC::Succeeded),
        ("test", SC::Succeeded),
        ("scan", SC::Failed),
        ("deploy", SC::Skipped),
        ("dast", SC::Skipped),
    ];
    assert_classifications(&outcome.run, &expected);
    assert_run_status(&outcome.run, RunStatus::Failure);
    assert_finalized_once(&harness, &outcome);

    let summary: RunSummary = serde_json::from_str(
        &std::fs::read_to_string(outcome.manifest.root.join(SUMMARY_FILE)).unwrap(),
    )
    .unwrap();
    let lines: Vec<(&str, SC)> = summary
        .stages
        .iter()
        .map(|s| (s.name.as_str(), s.classification))
        .collect();
    assert_eq!(lines, expected);

    let sent = harness.mail.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].subject, "[FAILURE] webapp #42");
    for (name, classification) in expected {
        assert!(
            sent[0]
                .body
                .lines()
                .any(|l| l.contains(name) && l.contains(&classification.to_string())),
            "{name} {classification}"
        );
    }
}

#[tokio::test]
async fn test_out_of_range_timeout_rejected_before_any_stage() {
    let harness = Harness::new();
    assert_eq!(
        pipeline()
            .stage(cmd("test", "pytest").with_timeout_secs(1e30))
            .unwrap_err()
            .code,
        codes::TIMEOUT
    );

    let mut spec = pipeline().stage(cmd("install", "pip")).unwrap().build().unwrap();
    spec.stages.push(cmd("test", "pytest").with_timeout_secs(1e30));

    let err = harness.runner().run(spec).await.unwrap_err();
    assert_eq!(err.code, codes::TIMEOUT);
    assert!(harness.executor.calls().is_empty());
    assert!(harness.events.is_empty());
}

#[tokio::test]
async fn test_path_like_stage_name_rejected() {
    let harness = Harness::new();
    let mut spec = pipeline().stage(cmd("install", "pip")).unwrap().build().unwrap();
    spec.stages.push(cmd("../../escaped", "semgrep").with_artifact("r.json"));

    let err = harness.runner().run(spec).await.unwrap_err();
    assert_eq!(err.code, codes::NAME);
    assert_eq!(harness.mail.attempts(), 0);
}

#[tokio::test]
async fn test_oversized_finalize_timeout_still_finalizes() {
    let harness = Harness::new();
    let spec = pipeline().stage(cmd("install", "pip")).unwrap().build().unwrap();
    let config = RunnerConfig::default()
        .with_archive_dir(harness.archive.path())
        .with_finalize_timeout_secs(1e30)
        .with_cleanup_timeout_secs(1e30);

    let outcome = harness.runner().with_config(config).run(spec).await.unwrap();

    assert_run_status(&outcome.run, RunStatus::Success);
    assert!(outcome.warnings.is_empty());
    assert_finalized_once(&harness, &outcome);
}

#[tokio::test]
async fn test_all_stages_succeed() {
    let harness = Harness::new();
    let spec = pipeline()
        .stage(cmd("install", "npm"))
        .unwrap()
        .stage(cmd("lint", "eslint"))
        .unwrap()
        .build()
        .unwrap();

    let outcome = harness.runner().run(spec).await.unwrap();

    assert_run_status(&outcome.run, RunStatus::Success);
    assert_eq!(outcome.run.count(SC::Succeeded), 2);
    assert!(outcome.warnings.is_empty());
    assert_finalized_once(&harness, &outcome);
    assert!(harness.events.events_of_type(kinds::PIPELINE_HALTED).is_empty());

    let types = harness.events.event_types();
    assert_eq!(types.first().map(String::as_str), Some(kinds::PIPELINE_STARTED));
    assert_eq!(types.last().map(String::as_str), Some(kinds::PIPELINE_FINALIZED));
}

#[tokio::test]
async fn test_ignore_error_records_exit_status() {
    let harness = Harness::new();
    harness.executor.exit_with("safety", 64);
    let spec = pipeline()
        .stage(cmd("deps", "safety").with_policy(StagePolicy::IgnoreError))
        .unwrap()
        .build()
        .unwrap();

    let outcome = harness.runner().run(spec).await.unwrap();

    assert_stage(&outcome.run, "deps", SC::Succeeded);
    assert_eq!(outcome.run.result("deps").unwrap().exit_status, Some(64));
    assert_run_status(&outcome.run, RunStatus::Success);
}

#[tokio::test]
async fn test_quality_gate_timeout_warns() {
    let harness = Harness::new();
    let source = StaticAnalysisSource::always(AnalysisStatus::Pending);
    let spec = pipeline()
        .stage(StageSpec::new(
            "gate",
            StageAction::QualityGate {
                project_key: "${PROJECT}".to_string(),
                timeout_secs: 0.2,
                poll_interval_secs: 0.05,
                abort_pipeline: true,
            },
        ))
        .unwrap()
        .stage(cmd("package", "tar"))
        .unwrap()
        .build()
        .unwrap();

    let outcome = harness
        .runner()
        .with_analysis_source(Arc::new(source.clone()))
        .run(spec)
        .await
        .unwrap();

    assert_classifications(&outcome.run, &[("gate", SC::Warned), ("package", SC::Succeeded)]);
    assert_run_status(&outcome.run, RunStatus::Success);
    assert_eq!(
        outcome.run.result("gate").unwrap().note.as_deref(),
        Some("quality gate TIMEOUT")
    );
    assert!(source.polls() >= 2);
}

#[tokio::test]
async fn test_quality_gate_failure_can_abort() {
    let harness = Harness::new();
    let gate = |abort_pipeline| {
        StageAction::QualityGate {
            project_key: "webapp".to_string(),
            timeout_secs: 1.0,
            poll_interval_secs: 0.05,
            abort_pipeline,
        }
    };
    let spec = pipeline()
        .stage(StageSpec::new("advisory", gate(false)))
        .unwrap()
        .stage(StageSpec::new("blocking", gate(true)))
        .unwrap()
        .stage(cmd("package", "tar"))
        .unwrap()
        .build()
        .unwrap();

    let outcome = harness
        .runner()
        .with_analysis_source(Arc::new(StaticAnalysisSource::always(AnalysisStatus::Fail)))
        .run(spec)
        .await
        .unwrap();

    assert_classifications(
        &outcome.run,
        &[
            ("advisory", SC::Warned),
            ("blocking", SC::Failed),
            ("package", SC::Skipped),
        ],
    );
}

#[tokio::test]
async fn test_pipeline_default_timeout_does_not_cut_quality_gate_short() {
    let harness = Harness::new();
    let gate = |timeout_secs| StageAction::QualityGate {
        project_key: "webapp".to_string(),
        timeout_secs,
        poll_interval_secs: 0.05,
        abort_pipeline: false,
    };
    let spec = pipeline()
        .default_stage_timeout_secs(0.1)
        .stage(StageSpec::new("gate", gate(0.4)))
        .unwrap()
        .stage(StageSpec::new("bounded-gate", gate(5.0)).with_timeout_secs(0.1))
        .unwrap()
        .stage(cmd("package", "tar"))
        .unwrap()
        .build()
        .unwrap();

    let outcome = harness
        .runner()
        .with_analysis_source(Arc::new(StaticAnalysisSource::never_responding()))
        .run(spec)
        .await
        .unwrap();

    assert_classifications(
        &outcome.run,
        &[
            ("gate", SC::Warned),
            ("bounded-gate", SC::Warned),
            ("package", SC::Succeeded),
        ],
    );
    assert_run_status(&outcome.run, RunStatus::Success);
    assert_eq!(
        outcome.run.result("gate").unwrap().note.as_deref(),
        Some("quality gate TIMEOUT")
    );
    let bounded = outcome.run.result("bounded-gate").unwrap();
    assert_eq!(bounded.exit_status, Some(TIMEOUT_EXIT_STATUS));
    assert_eq!(bounded.note.as_deref(), Some("timed out after 0.1s"));
}

#[tokio::test]
async fn test_stage_timeout_exits_124() {
    let harness = Harness::new();
    harness.executor.hang("zap-baseline");
    let spec = pipeline()
        .stage(cmd("dast", "zap-baseline").with_timeout_secs(0.1))
        .unwrap()
        .stage(cmd("report", "cat"))
        .unwrap()
        .build()
        .unwrap();

    let outcome = harness.runner().run(spec).await.unwrap();

    let dast = outcome.run.result("dast").unwrap();
    assert_eq!(dast.classification, SC::Failed);
    assert_eq!(dast.exit_status, Some(TIMEOUT_EXIT_STATUS));
    assert_stage(&outcome.run, "report", SC::Skipped);
}

#[tokio::test]
async fn test_tool_crash_fails_regardless_of_policy() {
    let harness = Harness::new();
    harness.executor.fail_to_spawn("semgrep");
    let spec = pipeline()
        .stage(cmd("sast", "semgrep").with_policy(StagePolicy::IgnoreError))
        .unwrap()
        .stage(cmd("package", "tar"))
        .unwrap()
        .build()
        .unwrap();

    let outcome = harness.runner().run(spec).await.unwrap();

    assert_classifications(&outcome.run, &[("sast", SC::Failed), ("package", SC::Skipped)]);
    assert_eq!(outcome.run.result("sast").unwrap().exit_status, None);
    assert!(outcome.run.error.is_none());
    assert_finalized_once(&harness, &outcome);
}

#[tokio::test]
async fn test_panicking_stage_still_finalizes() {
    let harness = Harness::new();
    let spec = pipeline()
        .stage(cmd("install", "pip"))
        .unwrap()
        .stage(StageSpec::custom("fuzz", "fuzzer").with_policy(StagePolicy::IgnoreError))
        .unwrap()
        .stage(cmd("package", "tar"))
        .unwrap()
        .build()
        .unwrap();

    let outcome = harness
        .runner()
        .register_handler("fuzzer", Arc::new(PanickingStage::new("fuzzer blew up")))
        .run(spec)
        .await
        .unwrap();

    assert_classifications(
        &outcome.run,
        &[
            ("install", SC::Succeeded),
            ("fuzz", SC::Failed),
            ("package", SC::Skipped),
        ],
    );
    assert_run_status(&outcome.run, RunStatus::Failure);
    assert!(outcome.internal_error().unwrap().contains("fuzzer blew up"));
    assert_finalized_once(&harness, &outcome);
    assert!(outcome.into_result().is_err());
}

#[tokio::test]
async fn test_internal_error_still_finalizes() {
    let harness = Harness::new();
    let spec = pipeline()
        .stage(StageSpec::custom("sbom", "syft"))
        .unwrap()
        .stage(cmd("package", "tar"))
        .unwrap()
        .build()
        .unwrap();

    let outcome = harness
        .runner()
        .register_handler("syft", Arc::new(FailingStage::new("catalog corrupted")))
        .run(spec)
        .await
        .unwrap();

    assert_classifications(&outcome.run, &[("sbom", SC::Failed), ("package", SC::Skipped)]);
    assert!(outcome.internal_error().unwrap().contains("catalog corrupted"));
    assert_finalized_once(&harness, &outcome);
}

#[tokio::test]
async fn test_cancellation_aborts_current_and_remaining() {
    let harness = Harness::new();
    let spec = pipeline()
        .stage(cmd("install", "pip"))
        .unwrap()
        .stage(StageSpec::custom("build", "slow"))
        .unwrap()
        .stage(cmd("package", "tar"))
        .unwrap()
        .build()
        .unwrap();

    let token = Arc::new(CancellationToken::new());
    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        canceller.cancel("operator abort");
    });

    let outcome = harness
        .runner()
        .register_handler("slow", Arc::new(SlowStage::new(Duration::from_secs(10))))
        .run_with_cancellation(spec, token)
        .await
        .unwrap();

    assert_classifications(
        &outcome.run,
        &[
            ("install", SC::Succeeded),
            ("build", SC::Aborted),
            ("package", SC::Aborted),
        ],
    );
    assert_run_status(&outcome.run, RunStatus::Failure);
    assert_eq!(
        outcome.run.result("build").unwrap().note.as_deref(),
        Some("run cancelled: operator abort")
    );
    assert_finalized_once(&harness, &outcome);
}

#[tokio::test]
async fn test_dropped_run_finalizes_exactly_once() {
    let harness = Harness::new();
    let spec = pipeline()
        .stage(StageSpec::custom("build", "slow"))
        .unwrap()
        .stage(cmd("package", "tar"))
        .unwrap()
        .build()
        .unwrap();

    let runner = Arc::new(
        harness
            .runner()
            .register_handler("slow", Arc::new(SlowStage::new(Duration::from_secs(10)))),
    );
    let task = tokio::spawn({
        let runner = runner.clone();
        async move { runner.run(spec).await }
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    task.abort();
    assert!(task.await.unwrap_err().is_cancelled());

    harness.wait_for_finalization().await;
    assert_eq!(harness.finalized(), 1);
    assert_eq!(harness.mail.attempts(), 1);
    assert_eq!(harness.mail.sent()[0].subject, "[FAILURE] webapp #42");

    let halted = harness.events.events_of_type(kinds::PIPELINE_HALTED);
    assert_eq!(halted.len(), 1);
    assert_eq!(
        halted[0].1.as_ref().unwrap()["unresolved"],
        serde_json::json!(["build", "package"])
    );
}

#[tokio::test]
async fn test_checkout_failure_skips_every_stage() {
    let harness = Harness::new();
    let spec = pipeline()
        .stage(cmd("install", "pip"))
        .unwrap()
        .stage(cmd("test", "pytest"))
        .unwrap()
        .build()
        .unwrap();

    let runner = PipelineRunner::new(Arc::new(FailingCheckout::new("repository not found")))
        .with_executor(harness.executor.clone())
        .with_mail_transport(harness.mail.clone())
        .with_event_sink(harness.events.clone())
        .with_config(RunnerConfig::default().with_archive_dir(harness.archive.path()));
    let outcome = runner.run(spec).await.unwrap();

    assert_classifications(&outcome.run, &[("install", SC::Skipped), ("test", SC::Skipped)]);
    assert_run_status(&outcome.run, RunStatus::Failure);
    assert!(outcome.internal_error().unwrap().contains("repository not found"));
    assert!(harness.executor.calls().is_empty());
    assert_finalized_once(&harness, &outcome);
}

#[tokio::test]
async fn test_conditions_skip_stages() {
    let harness = Harness::new();
    harness.executor.exit_with("docker", 1);
    let spec = pipeline()
        .stage(cmd("image", "docker").with_policy(StagePolicy::WarnOnError))
        .unwrap()
        .stage(cmd("push", "crane").when(StageCondition::StageSucceeded {
            stage: "image".to_string(),
        }))
        .unwrap()
        .stage(cmd("release", "gh").when(StageCondition::EnvEquals {
            var: "BRANCH".to_string(),
            value: "main".to_string(),
        }))
        .unwrap()
        .stage(cmd("notes", "git").when(StageCondition::EnvEquals {
            var: "BRANCH".to_string(),
            value: "release".to_string(),
        }))
        .unwrap()
        .build()
        .unwrap();

    let outcome = harness
        .runner()
        .with_env_lookup(|key| (key == "BRANCH").then(|| "main".to_string()))
        .run(spec)
        .await
        .unwrap();

    assert_classifications(
        &outcome.run,
        &[
            ("image", SC::Warned),
            ("push", SC::Skipped),
            ("release", SC::Succeeded),
            ("notes", SC::Skipped),
        ],
    );
    assert_eq!(
        outcome.run.result("push").unwrap().note.as_deref(),
        Some("condition not met")
    );
    assert_run_status(&outcome.run, RunStatus::Success);
    assert_eq!(harness.events.events_of_type(kinds::STAGE_SKIPPED).len(), 2);
}

#[tokio::test]
async fn test_artifacts_are_archived_and_summarized() {
    let harness = Harness::new();
    harness
        .executor
        .writes("pytest", "reports/junit.xml", "<testsuite tests=\"3\"/>");
    harness
        .executor
        .writes("bandit", "reports/bandit.json", "{}");
    harness.executor.exit_with("bandit", 1);

    let spec = pipeline()
        .stage(cmd("test", "pytest").with_artifact("reports/*.xml"))
        .unwrap()
        .stage(
            cmd("sast", "bandit")
                .with_policy(StagePolicy::WarnOnError)
                .with_category("security")
                .with_artifact("reports/*.json"),
        )
        .unwrap()
        .build()
        .unwrap();

    let outcome = harness.runner().run(spec).await.unwrap();

    assert_eq!(
        outcome.run.result("test").unwrap().artifacts,
        vec![PathBuf::from("reports/junit.xml")]
    );
    let manifest = &outcome.manifest;
    assert!(manifest.root.starts_with(harness.archive.path()));
    assert_eq!(manifest.entries.len(), 2);
    assert!(manifest.missing.is_empty());
    for entry in &manifest.entries {
        assert!(manifest.root.join(&entry.archived).is_file());
    }
    assert_eq!(
        manifest.files_for_stage("sast"),
        vec![manifest.root.join("sast/reports/bandit.json")]
    );
    assert_eq!(manifest.counts_by_category().get("security"), Some(&1));
    assert!(manifest.root.join(MANIFEST_FILE).is_file());
    assert!(manifest.root.join(SUMMARY_FILE).is_file());

    let sent = harness.mail.sent();
    assert_eq!(sent[0].attachments.len(), 2);
    assert_eq!(harness.events.events_of_type(kinds::REPORTS_COLLECTED).len(), 1);
    assert_eq!(harness.events.events_of_type(kinds::NOTIFICATION_SENT).len(), 1);
}

#[tokio::test]
async fn test_deploy_and_health_check_with_teardown() {
    let harness = Harness::new();
    harness.executor.respond(
        "docker run",
        crate::interfaces::CommandOutput {
            stdout: "c0ffee\n".to_string(),
            ..crate::interfaces::CommandOutput::with_status(0)
        },
    );
    let probe = Arc::new(ScriptedProbe::sequence(vec![Ok(503), Ok(200)]));

    let spec = pipeline()
        .stage(StageSpec::new(
            "image",
            StageAction::BuildImage {
                image: "webapp:${BUILD_ID}".to_string(),
                context: PathBuf::from("."),
            },
        ))
        .unwrap()
        .stage(StageSpec::new(
            "deploy",
            StageAction::Deploy {
                image: "webapp:${BUILD_ID}".to_string(),
                container_name: "webapp-${BUILD_ID}".to_string(),
                ports: vec![PortMapping {
                    host: 8080,
                    container: 80,
                }],
            },
        ))
        .unwrap()
        .stage(StageSpec::new(
            "health",
            StageAction::HealthCheck {
                url: "http://localhost:8080/health".to_string(),
                max_attempts: 5,
                interval_secs: 0.01,
            },
        ))
        .unwrap()
        .build()
        .unwrap();

    let outcome = harness.runner().with_probe(probe.clone()).run(spec).await.unwrap();

    assert_classifications(
        &outcome.run,
        &[
            ("image", SC::Succeeded),
            ("deploy", SC::Succeeded),
            ("health", SC::Succeeded),
        ],
    );
    assert_eq!(probe.probes(), 2);
    assert_eq!(harness.executor.count("docker build -t webapp:42"), 1);
    assert_eq!(harness.executor.count("docker run -d --name webapp-42 -p 8080:80"), 1);
    assert_eq!(harness.executor.count("docker stop webapp-42"), 1);
    // Once for the stale container, once during teardown.
    assert_eq!(harness.executor.count("docker rm -f webapp-42"), 2);
}

#[tokio::test]
async fn test_unready_service_warns() {
    let harness = Harness::new();
    let spec = pipeline()
        .stage(StageSpec::new(
            "health",
            StageAction::HealthCheck {
                url: "http://localhost:8080/health".to_string(),
                max_attempts: 3,
                interval_secs: 0.01,
            },
        ))
        .unwrap()
        .build()
        .unwrap();

    let outcome = harness
        .runner()
        .with_probe(Arc::new(ScriptedProbe::always(503)))
        .run(spec)
        .await
        .unwrap();

    assert_stage(&outcome.run, "health", SC::Warned);
    assert_run_status(&outcome.run, RunStatus::Success);
}

#[tokio::test]
async fn test_zero_attempts_rejected_before_any_stage() {
    let harness = Harness::new();
    let mut spec = pipeline().stage(cmd("install", "pip")).unwrap().build().unwrap();
    spec.stages.push(StageSpec::new(
        "health",
        StageAction::HealthCheck {
            url: "http://localhost:8080/health".to_string(),
            max_attempts: 0,
            interval_secs: 1.0,
        },
    ));

    let err = harness.runner().run(spec).await.unwrap_err();

    assert_eq!(err.code, codes::HEALTH_ATTEMPTS);
    assert!(harness.executor.calls().is_empty());
    assert_eq!(harness.mail.attempts(), 0);
    assert!(harness.events.is_empty());
}

#[tokio::test]
async fn test_unregistered_handler_rejected() {
    let harness = Harness::new();
    let spec = pipeline()
        .stage(StageSpec::custom("zap", "zap"))
        .unwrap()
        .build()
        .unwrap();

    let err = harness.runner().run(spec).await.unwrap_err();
    assert_eq!(err.code, codes::HANDLER);
    assert!(harness.events.is_empty());
}

#[tokio::test]
async fn test_notification_failure_is_a_warning() {
    let harness = Harness::with_mail(RecordingMailTransport::failing("relay refused"));
    let spec = pipeline().stage(cmd("install", "pip")).unwrap().build().unwrap();

    let outcome = harness.runner().run(spec).await.unwrap();

    assert_run_status(&outcome.run, RunStatus::Success);
    assert!(matches!(
        outcome.warnings.as_slice(),
        [FinalizationWarning::Notification(reason)] if reason.contains("relay refused")
    ));
    assert_finalized_once(&harness, &outcome);
}

#[tokio::test]
async fn test_custom_stage_sees_context() {
    let harness = Harness::new();
    let recorder = Arc::new(RecordingStage::new(0));
    recorder.set_outcome(StageOutcome::exit(3).with_note("2 findings"));
    let spec = pipeline()
        .stage(StageSpec::custom("secrets", "gitleaks").with_policy(StagePolicy::WarnOnError))
        .unwrap()
        .stage(StageSpec::custom("version", "echo-build"))
        .unwrap()
        .build()
        .unwrap();

    let outcome = harness
        .runner()
        .register_handler("gitleaks", recorder.clone())
        .register_handler(
            "echo-build",
            Arc::new(FnStage::new("echo", |ctx| async move {
                let outcome = if ctx.build_id == "42" && ctx.project == "webapp" {
                    StageOutcome::success()
                } else {
                    StageOutcome::exit(1)
                };
                Ok::<_, StageError>(outcome)
            })),
        )
        .run(spec)
        .await
        .unwrap();

    assert_eq!(recorder.recorded_stages(), vec!["secrets".to_string()]);
    let secrets = outcome.run.result("secrets").unwrap();
    assert_eq!(secrets.classification, SC::Warned);
    assert_eq!(secrets.note.as_deref(), Some("2 findings"));
    assert_stage(&outcome.run, "version", SC::Succeeded);
}
