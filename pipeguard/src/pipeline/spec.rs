//! Pipeline and stage specifications.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::run::PipelineRun;
use crate::core::{StageClassification, StagePolicy};
use crate::errors::{codes, ConfigSuggestions, ConfigurationError, PipeguardError};
use crate::interfaces::{CommandSpec, PortMapping};
use crate::report::ArtifactPattern;

/// The external collaborator a stage invokes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StageAction {
    /// Run an external tool through the command executor.
    Command(CommandSpec),
    /// Wait for the static-analysis quality gate.
    QualityGate {
        /// Project key in the analysis system.
        project_key: String,
        /// How long to wait for a verdict.
        #[serde(default = "default_gate_timeout")]
        timeout_secs: f64,
        /// Delay between status polls.
        #[serde(default = "default_gate_poll")]
        poll_interval_secs: f64,
        /// Escalate a failed gate per the stage policy instead of warning.
        #[serde(default)]
        abort_pipeline: bool,
    },
    /// Poll a deployed endpoint until it answers 2xx.
    HealthCheck {
        /// URL to probe.
        url: String,
        /// Maximum number of probes.
        max_attempts: u32,
        /// Delay between probes.
        #[serde(default = "default_health_interval")]
        interval_secs: f64,
    },
    /// Build a container image.
    BuildImage {
        /// Image name; `${BUILD_ID}` and `${PROJECT}` are expanded.
        image: String,
        /// Build context relative to the workspace.
        #[serde(default = "default_context")]
        context: PathBuf,
    },
    /// Start the application container.
    Deploy {
        /// Image to run; `${BUILD_ID}` and `${PROJECT}` are expanded.
        image: String,
        /// Container name.
        container_name: String,
        /// Published ports.
        #[serde(default)]
        ports: Vec<PortMapping>,
    },
    /// A stage implementation registered on the runner under this name.
    Custom {
        /// Registered handler name.
        handler: String,
    },
}

impl StageAction {
    /// Quality gates and health checks bound their own wait and only ever warn
    /// when it runs out.
    #[must_use]
    pub fn is_self_bounded(&self) -> bool {
        matches!(self, Self::QualityGate { .. } | Self::HealthCheck { .. })
    }
}

fn default_gate_timeout() -> f64 {
    300.0
}

fn default_gate_poll() -> f64 {
    5.0
}

fn default_health_interval() -> f64 {
    5.0
}

fn default_context() -> PathBuf {
    PathBuf::from(".")
}

/// Condition deciding whether a stage runs at all.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StageCondition {
    /// Run only if an earlier stage was classified SUCCEEDED.
    StageSucceeded {
        /// The earlier stage.
        stage: String,
    },
    /// Run only if an environment variable has this value.
    EnvEquals {
        /// Variable name.
        var: String,
        /// Required value.
        value: String,
    },
}

impl StageCondition {
    /// Evaluates the condition against the run so far.
    pub fn holds<F>(&self, run: &PipelineRun, env: F) -> bool
    where
        F: Fn(&str) -> Option<String>,
    {
        match self {
            Self::StageSucceeded { stage } => run
                .result(stage)
                .is_some_and(|r| r.classification == StageClassification::Succeeded),
            Self::EnvEquals { var, value } => env(var).as_deref() == Some(value.as_str()),
        }
    }
}

/// Specification for a single stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageSpec {
    /// Unique stage name.
    pub name: String,
    /// The collaborator invocation.
    pub action: StageAction,
    /// Failure policy.
    #[serde(default)]
    pub policy: StagePolicy,
    /// Glob patterns of report files the stage produces.
    #[serde(default)]
    pub artifacts: Vec<String>,
    /// Per-stage timeout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<f64>,
    /// Artifact category used in notifications; defaults to the stage name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Optional gating condition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<StageCondition>,
}

impl StageSpec {
    /// Creates a new stage specification with the FAIL_FAST policy.
    #[must_use]
    pub fn new(name: impl Into<String>, action: StageAction) -> Self {
        Self {
            name: name.into(),
            action,
            policy: StagePolicy::default(),
            artifacts: Vec::new(),
            timeout_secs: None,
            category: None,
            when: None,
        }
    }

    /// Creates a command stage.
    #[must_use]
    pub fn command(name: impl Into<String>, command: CommandSpec) -> Self {
        Self::new(name, StageAction::Command(command))
    }

    /// Creates a stage backed by a registered handler.
    #[must_use]
    pub fn custom(name: impl Into<String>, handler: impl Into<String>) -> Self {
        Self::new(
            name,
            StageAction::Custom {
                handler: handler.into(),
            },
        )
    }

    /// Sets the policy.
    #[must_use]
    pub fn with_policy(mut self, policy: StagePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Adds an artifact glob.
    #[must_use]
    pub fn with_artifact(mut self, pattern: impl Into<String>) -> Self {
        self.artifacts.push(pattern.into());
        self
    }

    /// Sets the timeout.
    #[must_use]
    pub fn with_timeout_secs(mut self, secs: f64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    /// Sets the artifact category.
    #[must_use]
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    /// Sets the gating condition.
    #[must_use]
    pub fn when(mut self, condition: StageCondition) -> Self {
        self.when = Some(condition);
        self
    }

    /// Returns the artifact category.
    #[must_use]
    pub fn category(&self) -> &str {
        self.category.as_deref().unwrap_or(&self.name)
    }

    /// Returns the effective timeout, falling back to `default`.
    ///
    /// Quality gates and health checks carry their own bound, so the pipeline
    /// default never applies to them.
    #[must_use]
    pub fn timeout(&self, default: Option<f64>) -> Option<Duration> {
        let secs = if self.action.is_self_bounded() {
            self.timeout_secs
        } else {
            self.timeout_secs.or(default)
        };
        secs.and_then(|s| Duration::try_from_secs_f64(s).ok())
    }

    /// Compiles the artifact patterns.
    pub fn artifact_patterns(&self) -> Result<Vec<ArtifactPattern>, ConfigurationError> {
        self.artifacts
            .iter()
            .map(|p| {
                ArtifactPattern::new(p).map_err(|e| e.with_stages(vec![self.name.clone()]))
            })
            .collect()
    }

    /// Validates the stage in isolation.
    ///
    /// # Errors
    ///
    /// Returns an error for a blank name, a zero-attempt health check, a
    /// non-positive timeout, or an invalid artifact pattern.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.name.trim().is_empty() {
            return Err(ConfigurationError::new(codes::NAME, "Stage name cannot be empty")
                .with_fix_hint(ConfigSuggestions::get(codes::NAME).unwrap_or_default()));
        }
        if !is_path_safe(&self.name) {
            return Err(ConfigurationError::new(
                codes::NAME,
                format!(
                    "Stage name '{}' must not contain path separators or start with '.'",
                    self.name
                ),
            )
            .with_stages(vec![self.name.clone()])
            .with_fix_hint(ConfigSuggestions::get(codes::NAME).unwrap_or_default()));
        }

        if let Some(secs) = self.timeout_secs {
            check_positive(&self.name, "timeout_secs", secs)?;
        }

        match &self.action {
            StageAction::HealthCheck {
                max_attempts,
                interval_secs,
                ..
            } => {
                if *max_attempts == 0 {
                    return Err(ConfigurationError::zero_attempts(&self.name));
                }
                check_non_negative(&self.name, "interval_secs", *interval_secs)?;
            }
            StageAction::QualityGate {
                timeout_secs,
                poll_interval_secs,
                ..
            } => {
                check_positive(&self.name, "timeout_secs", *timeout_secs)?;
                check_positive(&self.name, "poll_interval_secs", *poll_interval_secs)?;
            }
            StageAction::Command(cmd) if cmd.program.trim().is_empty() => {
                return Err(ConfigurationError::new(
                    codes::NAME,
                    format!("Stage '{}' has an empty command", self.name),
                )
                .with_stages(vec![self.name.clone()]));
            }
            _ => {}
        }

        self.artifact_patterns().map(|_| ())
    }
}

/// Stage names become archive directory names.
fn is_path_safe(name: &str) -> bool {
    !name.starts_with('.') && !name.contains(['/', '\\']) && !name.contains("..")
}

fn check_positive(stage: &str, field: &str, value: f64) -> Result<(), ConfigurationError> {
    if value > 0.0 && Duration::try_from_secs_f64(value).is_ok() {
        Ok(())
    } else {
        Err(timeout_error(stage, field, value))
    }
}

fn check_non_negative(stage: &str, field: &str, value: f64) -> Result<(), ConfigurationError> {
    if Duration::try_from_secs_f64(value).is_ok() {
        Ok(())
    } else {
        Err(timeout_error(stage, field, value))
    }
}

fn timeout_error(stage: &str, field: &str, value: f64) -> ConfigurationError {
    ConfigurationError::new(
        codes::TIMEOUT,
        format!("Stage '{stage}' has invalid {field}: {value}"),
    )
    .with_stages(vec![stage.to_string()])
    .with_fix_hint(ConfigSuggestions::get(codes::TIMEOUT).unwrap_or_default())
}

/// Specification for an entire pipeline. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineSpec {
    /// Project name.
    pub project: String,
    /// Build identifier shown in notifications.
    #[serde(default = "default_build_id")]
    pub build_id: String,
    /// Notification recipients.
    #[serde(default)]
    pub recipients: Vec<String>,
    /// Timeout applied to stages that don't set one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_stage_timeout_secs: Option<f64>,
    /// Stages in execution order.
    pub stages: Vec<StageSpec>,
    /// Additional metadata.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

fn default_build_id() -> String {
    "local".to_string()
}

impl PipelineSpec {
    /// Creates an empty specification for `project`.
    #[must_use]
    pub fn new(project: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            build_id: default_build_id(),
            recipients: Vec::new(),
            default_stage_timeout_secs: None,
            stages: Vec::new(),
            metadata: HashMap::new(),
        }
    }

    /// Parses and validates a JSON specification.
    pub fn from_json_str(json: &str) -> Result<Self, PipeguardError> {
        let spec: Self = serde_json::from_str(json)?;
        spec.validate()?;
        Ok(spec)
    }

    /// Reads, parses and validates a JSON specification file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, PipeguardError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    /// Returns the stage names in order.
    #[must_use]
    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name.as_str()).collect()
    }

    /// Validates the whole pipeline.
    ///
    /// # Errors
    ///
    /// Returns the first problem found: blank project name, no stages,
    /// an invalid stage, a duplicate name, or a condition that references a
    /// stage not declared before it.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.project.trim().is_empty() {
            return Err(ConfigurationError::new(
                codes::NAME,
                "Project name cannot be empty or whitespace-only",
            )
            .with_fix_hint(ConfigSuggestions::get(codes::NAME).unwrap_or_default()));
        }
        if self.stages.is_empty() {
            return Err(ConfigurationError::empty_pipeline());
        }
        if let Some(secs) = self.default_stage_timeout_secs {
            check_positive("*", "default_stage_timeout_secs", secs)?;
        }

        let mut seen: HashSet<&str> = HashSet::new();
        for stage in &self.stages {
            stage.validate()?;

            if let Some(StageCondition::StageSucceeded { stage: dep }) = &stage.when {
                if !seen.contains(dep.as_str()) {
                    return Err(ConfigurationError::new(
                        codes::CONDITION,
                        format!(
                            "Stage '{}' is conditioned on '{}', which is not declared before it",
                            stage.name, dep
                        ),
                    )
                    .with_stages(vec![stage.name.clone(), dep.clone()])
                    .with_fix_hint(ConfigSuggestions::get(codes::CONDITION).unwrap_or_default()));
                }
            }

            if !seen.insert(stage.name.as_str()) {
                return Err(ConfigurationError::duplicate_stage(&stage.name));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn cmd(name: &str) -> StageSpec {
        StageSpec::command(name, CommandSpec::new("true"))
    }

    #[test]
    fn test_stage_spec_defaults() {
        let spec = cmd("lint");
        assert_eq!(spec.policy, StagePolicy::FailFast);
        assert_eq!(spec.category(), "lint");
        assert_eq!(spec.with_category("sast").category(), "sast");
    }

    #[test]
    fn test_stage_timeout_fallback() {
        let spec = cmd("test");
        assert_eq!(spec.timeout(Some(30.0)), Some(Duration::from_secs(30)));
        assert_eq!(spec.with_timeout_secs(5.0).timeout(Some(30.0)), Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_empty_pipeline_rejected() {
        let err = PipelineSpec::new("webapp").validate().unwrap_err();
        assert_eq!(err.code, codes::EMPTY);
    }

    #[test]
    fn test_blank_project_rejected() {
        let mut spec = PipelineSpec::new("   ");
        spec.stages.push(cmd("a"));
        assert_eq!(spec.validate().unwrap_err().code, codes::NAME);
    }

    #[test]
    fn test_duplicate_stage_rejected() {
        let mut spec = PipelineSpec::new("webapp");
        spec.stages = vec![cmd("scan"), cmd("build"), cmd("scan")];

        let err = spec.validate().unwrap_err();
        assert_eq!(err.code, codes::DUPLICATE);
        assert_eq!(err.stages, vec!["scan".to_string()]);
    }

    #[test]
    fn test_zero_attempt_health_check_rejected() {
        let mut spec = PipelineSpec::new("webapp");
        spec.stages.push(StageSpec::new(
            "health",
            StageAction::HealthCheck {
                url: "http://localhost:5000".to_string(),
                max_attempts: 0,
                interval_secs: 1.0,
            },
        ));

        assert_eq!(spec.validate().unwrap_err().code, codes::HEALTH_ATTEMPTS);
    }

    #[test]
    fn test_condition_must_reference_earlier_stage() {
        let mut spec = PipelineSpec::new("webapp");
        spec.stages = vec![
            cmd("deploy").when(StageCondition::StageSucceeded {
                stage: "build".to_string(),
            }),
            cmd("build"),
        ];
        assert_eq!(spec.validate().unwrap_err().code, codes::CONDITION);

        spec.stages.reverse();
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn test_invalid_timeout_rejected() {
        let mut spec = PipelineSpec::new("webapp");
        spec.stages.push(cmd("test").with_timeout_secs(0.0));
        assert_eq!(spec.validate().unwrap_err().code, codes::TIMEOUT);
    }

    #[test]
    fn test_unrepresentable_timeout_rejected() {
        let mut spec = PipelineSpec::new("webapp");
        spec.stages.push(cmd("test").with_timeout_secs(1e30));
        assert_eq!(spec.validate().unwrap_err().code, codes::TIMEOUT);

        spec.stages = vec![StageSpec::new(
            "gate",
            StageAction::QualityGate {
                project_key: "webapp".to_string(),
                timeout_secs: f64::MAX,
                poll_interval_secs: 1.0,
                abort_pipeline: false,
            },
        )];
        assert_eq!(spec.validate().unwrap_err().code, codes::TIMEOUT);

        spec.stages = vec![cmd("test")];
        spec.default_stage_timeout_secs = Some(1e30);
        assert_eq!(spec.validate().unwrap_err().code, codes::TIMEOUT);
    }

    #[test]
    fn test_path_like_stage_names_rejected() {
        for name in ["../../escaped", "reports/sast", "a\\b", ".hidden", "x..y"] {
            let mut spec = PipelineSpec::new("webapp");
            spec.stages.push(cmd(name));
            let err = spec.validate().unwrap_err();
            assert_eq!(err.code, codes::NAME, "{name}");
        }

        let mut spec = PipelineSpec::new("webapp");
        spec.stages.push(cmd("sast-scan_v2"));
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn test_default_timeout_skips_self_bounded_stages() {
        let gate = StageSpec::new(
            "gate",
            StageAction::QualityGate {
                project_key: "webapp".to_string(),
                timeout_secs: 300.0,
                poll_interval_secs: 5.0,
                abort_pipeline: false,
            },
        );
        assert_eq!(gate.timeout(Some(30.0)), None);
        assert_eq!(
            gate.with_timeout_secs(600.0).timeout(Some(30.0)),
            Some(Duration::from_secs(600))
        );
    }

    #[test]
    fn test_artifact_pattern_rejected() {
        let mut spec = PipelineSpec::new("webapp");
        spec.stages.push(cmd("scan").with_artifact("../secrets/*"));
        let err = spec.validate().unwrap_err();
        assert_eq!(err.code, codes::ARTIFACT);
        assert_eq!(err.stages, vec!["scan".to_string()]);
    }

    #[test]
    fn test_from_json() {
        let json = r#"{
            "project": "banking-app",
            "build_id": "42",
            "recipients": ["sec@example.com"],
            "stages": [
                {"name": "install", "action": {"type": "command", "program": "pip", "args": ["install", "-r", "requirements.txt"]}, "policy": "WARN_ON_ERROR"},
                {"name": "sast", "action": {"type": "command", "program": "bandit", "args": ["-r", "."]}, "policy": "WARN_ON_ERROR", "artifacts": ["bandit-report.json"], "category": "sast"},
                {"name": "quality-gate", "action": {"type": "quality_gate", "project_key": "banking-app", "timeout_secs": 60}},
                {"name": "health", "action": {"type": "health_check", "url": "http://localhost:5000", "max_attempts": 10}},
                {"name": "zap", "action": {"type": "custom", "handler": "zap"}, "when": {"type": "stage_succeeded", "stage": "health"}, "policy": "IGNORE_ERROR"}
            ]
        }"#;

        let spec = PipelineSpec::from_json_str(json).unwrap();
        assert_eq!(spec.build_id, "42");
        assert_eq!(spec.stage_names(), vec!["install", "sast", "quality-gate", "health", "zap"]);
        assert_eq!(spec.stages[1].category(), "sast");
        assert_eq!(
            spec.stages[2].action,
            StageAction::QualityGate {
                project_key: "banking-app".to_string(),
                timeout_secs: 60.0,
                poll_interval_secs: 5.0,
                abort_pipeline: false,
            }
        );
        assert_eq!(spec.stages[4].policy, StagePolicy::IgnoreError);
    }

    #[test]
    fn test_from_json_invalid_is_configuration_error() {
        let json = r#"{"project": "x", "stages": []}"#;
        let err = PipelineSpec::from_json_str(json).unwrap_err();
        assert!(matches!(err, PipeguardError::Configuration(_)));
    }

    #[test]
    fn test_env_condition() {
        let run = PipelineRun::new(&PipelineSpec::new("x"));
        let cond = StageCondition::EnvEquals {
            var: "BRANCH".to_string(),
            value: "main".to_string(),
        };
        assert!(cond.holds(&run, |_| Some("main".to_string())));
        assert!(!cond.holds(&run, |_| Some("dev".to_string())));
        assert!(!cond.holds(&run, |_| None));
    }
}
