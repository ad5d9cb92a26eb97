//! Lifecycle events emitted by the pipeline runner.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

/// Event type names emitted by the runner.
pub mod kinds {
    /// A run has started.
    pub const PIPELINE_STARTED: &str = "pipeline.started";
    /// A stage is about to execute.
    pub const STAGE_STARTED: &str = "stage.started";
    /// A stage executed and was classified.
    pub const STAGE_COMPLETED: &str = "stage.completed";
    /// A stage was resolved without executing.
    pub const STAGE_SKIPPED: &str = "stage.skipped";
    /// Forward progress stopped.
    pub const PIPELINE_HALTED: &str = "pipeline.halted";
    /// Reports were archived during finalization.
    pub const REPORTS_COLLECTED: &str = "reports.collected";
    /// The run summary was handed to the mail transport.
    pub const NOTIFICATION_SENT: &str = "notification.sent";
    /// Finalization finished; the run is terminal.
    pub const PIPELINE_FINALIZED: &str = "pipeline.finalized";
}
