//! Stage policy, classification and run status enums.

use serde::{Deserialize, Serialize};
use std::fmt;

/// How a stage's nonzero exit status affects the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StagePolicy {
    /// A failure halts the pipeline and fails the run.
    #[default]
    FailFast,
    /// A failure is recorded as a warning and the pipeline continues.
    WarnOnError,
    /// A failure is ignored; the stage is recorded as succeeded.
    IgnoreError,
}

impl fmt::Display for StagePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FailFast => write!(f, "FAIL_FAST"),
            Self::WarnOnError => write!(f, "WARN_ON_ERROR"),
            Self::IgnoreError => write!(f, "IGNORE_ERROR"),
        }
    }
}

impl StagePolicy {
    /// Classifies an exit status under this policy.
    #[must_use]
    pub fn classify(self, exit_status: i32) -> StageClassification {
        if exit_status == 0 {
            return StageClassification::Succeeded;
        }
        match self {
            Self::FailFast => StageClassification::Failed,
            Self::WarnOnError => StageClassification::Warned,
            Self::IgnoreError => StageClassification::Succeeded,
        }
    }
}

/// The recorded outcome of one stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StageClassification {
    /// Stage completed (or its failure was ignored).
    Succeeded,
    /// Stage failed without halting the pipeline.
    Warned,
    /// Stage failed and halted the pipeline.
    Failed,
    /// Stage was never executed.
    Skipped,
    /// Stage was interrupted or never started because the run was cancelled.
    Aborted,
}

impl fmt::Display for StageClassification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeeded => write!(f, "SUCCEEDED"),
            Self::Warned => write!(f, "WARNED"),
            Self::Failed => write!(f, "FAILED"),
            Self::Skipped => write!(f, "SKIPPED"),
            Self::Aborted => write!(f, "ABORTED"),
        }
    }
}

impl StageClassification {
    /// Returns true if the stage actually ran.
    #[must_use]
    pub fn was_executed(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Warned | Self::Failed)
    }

    /// Returns true if the classification halts forward progress.
    #[must_use]
    pub fn halts(&self) -> bool {
        matches!(self, Self::Failed | Self::Aborted)
    }
}

/// Overall status of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    /// No stage failed under FAIL_FAST and no internal error occurred.
    #[default]
    Success,
    /// A FAIL_FAST stage failed, the run was aborted, or an internal error occurred.
    Failure,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "SUCCESS"),
            Self::Failure => write!(f, "FAILURE"),
        }
    }
}

/// Runner state machine.
///
/// `Pending -> Running(i) -> {Running(j > i) | Halted}`; every path then goes
/// through `Finalizing` to `Terminal`. Indices may jump over stages skipped by
/// their condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "phase", content = "stage", rename_all = "snake_case")]
pub enum RunPhase {
    /// Run created, nothing executed yet.
    #[default]
    Pending,
    /// Executing the stage at this index.
    Running(usize),
    /// Forward progress stopped by a failure, abort or internal error.
    Halted,
    /// Running cleanup, report collection and notification.
    Finalizing,
    /// Done.
    Terminal(RunStatus),
}

impl RunPhase {
    /// Returns true if `next` is a legal successor of this phase.
    #[must_use]
    pub fn can_transition_to(&self, next: &Self) -> bool {
        match (self, next) {
            (Self::Pending, Self::Running(_) | Self::Halted | Self::Finalizing) => true,
            (Self::Running(i), Self::Running(j)) => j > i,
            (Self::Running(_) | Self::Halted, Self::Finalizing) => true,
            (Self::Running(_), Self::Halted) => true,
            (Self::Finalizing, Self::Terminal(_)) => true,
            _ => false,
        }
    }

    /// Returns true once the run has finished finalization.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminal(_))
    }
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running(i) => write!(f, "running({i})"),
            Self::Halted => write!(f, "halted"),
            Self::Finalizing => write!(f, "finalizing"),
            Self::Terminal(status) => write!(f, "terminal({status})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_classification() {
        assert_eq!(StagePolicy::FailFast.classify(0), StageClassification::Succeeded);
        assert_eq!(StagePolicy::FailFast.classify(2), StageClassification::Failed);
        assert_eq!(StagePolicy::WarnOnError.classify(1), StageClassification::Warned);
        assert_eq!(StagePolicy::IgnoreError.classify(127), StageClassification::Succeeded);
    }

    #[test]
    fn test_policy_serialize() {
        let json = serde_json::to_string(&StagePolicy::WarnOnError).unwrap();
        assert_eq!(json, r#""WARN_ON_ERROR""#);

        let policy: StagePolicy = serde_json::from_str(r#""IGNORE_ERROR""#).unwrap();
        assert_eq!(policy, StagePolicy::IgnoreError);
    }

    #[test]
    fn test_classification_display() {
        assert_eq!(StageClassification::Skipped.to_string(), "SKIPPED");
        assert_eq!(StageClassification::Aborted.to_string(), "ABORTED");
        assert!(StageClassification::Warned.was_executed());
        assert!(!StageClassification::Skipped.was_executed());
    }

    #[test]
    fn test_phase_transitions() {
        assert!(RunPhase::Pending.can_transition_to(&RunPhase::Running(0)));
        assert!(RunPhase::Running(0).can_transition_to(&RunPhase::Running(1)));
        assert!(RunPhase::Running(0).can_transition_to(&RunPhase::Running(2)));
        assert!(!RunPhase::Running(2).can_transition_to(&RunPhase::Running(2)));
        assert!(RunPhase::Running(3).can_transition_to(&RunPhase::Halted));
        assert!(RunPhase::Halted.can_transition_to(&RunPhase::Finalizing));
        assert!(!RunPhase::Halted.can_transition_to(&RunPhase::Running(4)));
        assert!(RunPhase::Finalizing.can_transition_to(&RunPhase::Terminal(RunStatus::Failure)));
        assert!(!RunPhase::Pending.can_transition_to(&RunPhase::Terminal(RunStatus::Success)));
    }

    #[test]
    fn test_run_status_default() {
        assert_eq!(RunStatus::default(), RunStatus::Success);
        assert_eq!(RunStatus::Failure.to_string(), "FAILURE");
    }
}
