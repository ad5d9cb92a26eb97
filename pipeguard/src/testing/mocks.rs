//! Mock stages for testing.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::errors::StageError;
use crate::stages::{Stage, StageContext, StageOutcome};

/// A stage that records calls and returns a configurable outcome.
#[derive(Debug)]
pub struct RecordingStage {
    outcome: Mutex<StageOutcome>,
    calls: AtomicUsize,
    contexts: Mutex<Vec<String>>,
}

impl RecordingStage {
    /// Creates a stage that exits with `exit_status`.
    #[must_use]
    pub fn new(exit_status: i32) -> Self {
        Self {
            outcome: Mutex::new(StageOutcome::exit(exit_status)),
            calls: AtomicUsize::new(0),
            contexts: Mutex::new(Vec::new()),
        }
    }

    /// Sets the outcome to return.
    pub fn set_outcome(&self, outcome: StageOutcome) {
        *self.outcome.lock() = outcome;
    }

    /// Returns the number of times the stage was called.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Returns the stage names from each call.
    #[must_use]
    pub fn recorded_stages(&self) -> Vec<String> {
        self.contexts.lock().clone()
    }
}

#[async_trait]
impl Stage for RecordingStage {
    fn kind(&self) -> &str {
        "recording"
    }

    async fn execute(&self, ctx: &StageContext) -> Result<StageOutcome, StageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.contexts.lock().push(ctx.stage_name.clone());
        Ok(self.outcome.lock().clone())
    }
}

/// A stage that panics.
#[derive(Debug, Clone)]
pub struct PanickingStage {
    message: String,
}

impl PanickingStage {
    /// Creates a stage panicking with `message`.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[async_trait]
impl Stage for PanickingStage {
    fn kind(&self) -> &str {
        "panicking"
    }

    #[allow(clippy::panic)]
    async fn execute(&self, _ctx: &StageContext) -> Result<StageOutcome, StageError> {
        panic!("{}", self.message)
    }
}

/// A stage that reports an internal error.
#[derive(Debug, Clone)]
pub struct FailingStage {
    reason: String,
}

impl FailingStage {
    /// Creates a stage failing with `reason`.
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl Stage for FailingStage {
    fn kind(&self) -> &str {
        "failing"
    }

    async fn execute(&self, ctx: &StageContext) -> Result<StageOutcome, StageError> {
        Err(StageError::internal(&ctx.stage_name, &self.reason))
    }
}

/// A stage that sleeps without observing cancellation.
#[derive(Debug, Clone)]
pub struct SlowStage {
    delay: Duration,
}

impl SlowStage {
    /// Creates a stage sleeping for `delay`.
    #[must_use]
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl Stage for SlowStage {
    fn kind(&self) -> &str {
        "slow"
    }

    async fn execute(&self, _ctx: &StageContext) -> Result<StageOutcome, StageError> {
        tokio::time::sleep(self.delay).await;
        Ok(StageOutcome::success())
    }
}
