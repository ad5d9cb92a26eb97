//! Stage that waits for a deployed endpoint to become ready.

use async_trait::async_trait;
use std::time::Duration;

use super::{Stage, StageContext, StageOutcome};
use crate::errors::StageError;
use crate::health::HealthChecker;
use crate::pipeline::StageDetail;

/// Polls an endpoint; an endpoint that never becomes ready only warns.
#[derive(Debug, Clone)]
pub struct HealthCheckStage {
    checker: HealthChecker,
    url: String,
    max_attempts: u32,
    interval: Duration,
}

impl HealthCheckStage {
    /// Creates a health check stage.
    #[must_use]
    pub fn new(
        checker: HealthChecker,
        url: impl Into<String>,
        max_attempts: u32,
        interval: Duration,
    ) -> Self {
        Self {
            checker,
            url: url.into(),
            max_attempts,
            interval,
        }
    }
}

#[async_trait]
impl Stage for HealthCheckStage {
    fn kind(&self) -> &str {
        "health_check"
    }

    async fn execute(&self, ctx: &StageContext) -> Result<StageOutcome, StageError> {
        let url = ctx.expand(&self.url);
        let result = self
            .checker
            .wait_until_ready(&url, self.max_attempts, self.interval, Some(&ctx.cancel))
            .await
            .map_err(StageError::Configuration)?;

        let outcome = if result.ready {
            StageOutcome::success()
        } else {
            StageOutcome::advisory(1).with_note(format!(
                "{url} not ready after {} attempt(s)",
                result.attempts
            ))
        };
        Ok(outcome.with_detail(StageDetail::HealthCheck { result }))
    }
}
