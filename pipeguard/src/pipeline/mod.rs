//! Pipeline specification and execution.
//!
//! This module provides:
//! - Pipeline and stage specifications, loadable from JSON
//! - A builder with per-stage validation
//! - The runner, which executes stages in order and always finalizes
//! - The run record and its stage results

mod builder;
mod config;
mod finalizer;
mod run;
mod runner;
mod spec;

#[cfg(test)]
mod integration_tests;

pub use builder::PipelineBuilder;
pub use config::{RunnerConfig, ENV_ARCHIVE_DIR, ENV_CLEANUP_TIMEOUT, ENV_FINALIZE_TIMEOUT};
pub use finalizer::RunOutcome;
pub use run::{PipelineRun, StageDetail, StageResult};
pub use runner::PipelineRunner;
pub use spec::{PipelineSpec, StageAction, StageCondition, StageSpec};
