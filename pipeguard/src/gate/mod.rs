//! Quality gate evaluation against an analysis report source.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::cancellation::CancellationToken;
use crate::interfaces::{AnalysisSource, AnalysisStatus};

/// Tri-state gate verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QualityGateResult {
    /// The analysis passed the gate.
    Pass,
    /// The analysis failed the gate.
    Fail,
    /// No verdict arrived in time.
    Timeout,
}

impl fmt::Display for QualityGateResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pass => write!(f, "PASS"),
            Self::Fail => write!(f, "FAIL"),
            Self::Timeout => write!(f, "TIMEOUT"),
        }
    }
}

/// Polls an [`AnalysisSource`] until it reports a verdict or the timeout expires.
///
/// Source errors are treated as "not ready yet": the gate keeps polling and
/// reports `Timeout` if they persist. A gate never fails the run by itself.
pub struct QualityGate {
    source: Arc<dyn AnalysisSource>,
    project_key: String,
    poll_interval: Duration,
    cancel: Option<Arc<CancellationToken>>,
}

impl QualityGate {
    /// Creates a gate for `project_key`.
    #[must_use]
    pub fn new(source: Arc<dyn AnalysisSource>, project_key: impl Into<String>) -> Self {
        Self {
            source,
            project_key: project_key.into(),
            poll_interval: Duration::from_secs(5),
            cancel: None,
        }
    }

    /// Sets the delay between polls.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Stops waiting when `token` is cancelled; the verdict is then `Timeout`.
    #[must_use]
    pub fn with_cancellation(mut self, token: Arc<CancellationToken>) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Waits up to `timeout` for a verdict.
    pub async fn evaluate(&self, timeout: Duration) -> QualityGateResult {
        let started = Instant::now();
        let deadline = started.checked_add(timeout);
        let remaining = || {
            deadline.map_or(Duration::MAX, |d| d.saturating_duration_since(Instant::now()))
        };
        let mut polls = 0u32;

        loop {
            polls += 1;
            let fetch = self.source.fetch_status(&self.project_key);
            let status = tokio::time::timeout(remaining(), fetch).await;

            match status {
                Ok(Ok(AnalysisStatus::Pass)) => {
                    info!(project = %self.project_key, polls, "Quality gate passed");
                    return QualityGateResult::Pass;
                }
                Ok(Ok(AnalysisStatus::Fail)) => {
                    warn!(project = %self.project_key, polls, "Quality gate failed");
                    return QualityGateResult::Fail;
                }
                Ok(Ok(AnalysisStatus::Pending)) => {
                    debug!(project = %self.project_key, polls, "Analysis still pending");
                }
                Ok(Err(e)) => {
                    warn!(project = %self.project_key, polls, error = %e, "Analysis source error");
                }
                Err(_) => break,
            }

            let left = remaining();
            if left.is_zero() {
                break;
            }
            let pause = self.poll_interval.min(left);
            let slept = match &self.cancel {
                Some(token) => token.sleep(pause).await,
                None => {
                    tokio::time::sleep(pause).await;
                    true
                }
            };
            if !slept {
                info!(project = %self.project_key, "Quality gate wait cancelled");
                return QualityGateResult::Timeout;
            }
        }

        warn!(
            project = %self.project_key,
            polls,
            waited_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "Quality gate timed out"
        );
        QualityGateResult::Timeout
    }
}

impl fmt::Debug for QualityGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QualityGate")
            .field("project_key", &self.project_key)
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}
