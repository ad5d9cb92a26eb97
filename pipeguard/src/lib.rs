//! # Pipeguard
//!
//! A stage-sequencing runtime for build and security pipelines.
//!
//! A pipeline is an ordered list of stages, each with a failure policy that
//! decides whether a failing tool halts the run, only warns, or is ignored.
//! Pipeguard provides:
//!
//! - **Policy-driven sequencing**: FAIL_FAST, WARN_ON_ERROR and IGNORE_ERROR
//! - **Guaranteed finalization**: cleanup, report archiving and notification run
//!   exactly once on every exit path, including panics and cancellation
//! - **Quality gates and health checks**: non-blocking waits on analysis
//!   servers and deployed services
//! - **Pluggable collaborators**: commands, containers, probes and mail behind traits
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use pipeguard::prelude::*;
//!
//! let spec = PipelineBuilder::new("webapp")
//!     .build_id("42")
//!     .recipient("dev@example.com")
//!     .stage(StageSpec::command("install", CommandSpec::new("npm").with_args(["ci"])))?
//!     .stage(
//!         StageSpec::command("sast", CommandSpec::new("semgrep").with_args(["--json"]))
//!             .with_policy(StagePolicy::WarnOnError)
//!             .with_artifact("reports/*.json"),
//!     )?
//!     .build()?;
//!
//! let runner = PipelineRunner::new(Arc::new(LocalCheckout::new(".")));
//! let outcome = runner.run(spec).await?;
//! println!("{}", outcome.run.status);
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod core;
pub mod errors;
pub mod events;
pub mod gate;
pub mod health;
pub mod interfaces;
pub mod notify;
pub mod observability;
pub mod pipeline;
pub mod report;
pub mod stages;
pub mod testing;
pub mod utils;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::{CancellationToken, CleanupRegistry};
    pub use crate::core::{RunPhase, RunStatus, StageClassification, StagePolicy};
    pub use crate::errors::{ConfigurationError, FinalizationWarning, PipeguardError, StageError};
    pub use crate::events::{EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::gate::{QualityGate, QualityGateResult};
    pub use crate::health::{HealthCheckResult, HealthChecker};
    pub use crate::interfaces::{
        AnalysisSource, CheckoutProvider, CommandExecutor, CommandSpec, ContainerRuntime,
        HttpProbe, LocalCheckout, MailTransport, PortMapping,
    };
    pub use crate::notify::{Notifier, RunSummary};
    pub use crate::observability::{init_tracing, LogFormat};
    pub use crate::pipeline::{
        PipelineBuilder, PipelineRun, PipelineRunner, PipelineSpec, RunOutcome, RunnerConfig,
        StageAction, StageCondition, StageResult, StageSpec,
    };
    pub use crate::report::{ArchiveManifest, ReportCollector};
    pub use crate::stages::{FnStage, Stage, StageContext, StageOutcome};
    pub use crate::utils::Timestamp;
    pub use std::sync::Arc;
}
