//! Testing utilities for pipeguard pipelines.
//!
//! This module provides:
//! - Scripted collaborators (executor, analysis source, probe, mail, checkout)
//! - Mock stages for custom handlers
//! - Assertions on run classifications

mod assertions;
mod collaborators;
mod mocks;

pub use assertions::{assert_classifications, assert_run_status, assert_stage};
pub use collaborators::{
    FailingCheckout, RecordingMailTransport, ScriptedExecutor, ScriptedProbe, StaticAnalysisSource,
};
pub use mocks::{FailingStage, PanickingStage, RecordingStage, SlowStage};
