//! Artifact discovery and archiving.

mod collector;
mod glob;
mod manifest;

pub use collector::ReportCollector;
pub use glob::{resolve_artifacts, ArtifactPattern};
pub use manifest::{ArchiveManifest, ArchivedArtifact, MissingArtifact, MANIFEST_FILE};
