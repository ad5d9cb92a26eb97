//! Core types shared by the runner, stages and reporting.

mod status;

pub use status::{RunPhase, RunStatus, StageClassification, StagePolicy};
