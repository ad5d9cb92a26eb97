//! Best-effort archiving of stage reports.

use sha2::{Digest, Sha256};
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, warn};

use super::manifest::{ArchiveManifest, ArchivedArtifact, MissingArtifact};
use crate::errors::PipeguardError;
use crate::pipeline::PipelineRun;

/// Copies every artifact listed in a run's results into an archive directory.
///
/// Files land at `<out>/<stage>/<workspace-relative path>`. A file that
/// vanished or can't be read is recorded in [`ArchiveManifest::missing`] and
/// never fails the collection.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReportCollector;

impl ReportCollector {
    /// Creates a collector.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Archives the run's artifacts into `output_dir` and writes the manifest.
    ///
    /// # Errors
    ///
    /// Fails only if `output_dir` or the manifest itself cannot be written.
    pub fn collect(
        &self,
        run: &PipelineRun,
        output_dir: &Path,
    ) -> Result<ArchiveManifest, PipeguardError> {
        fs::create_dir_all(output_dir)?;
        let mut manifest = ArchiveManifest::new(output_dir);

        for result in &run.results {
            for source in &result.artifacts {
                let Some(workspace) = run.workspace.as_deref() else {
                    manifest.missing.push(MissingArtifact {
                        stage: result.name.clone(),
                        source: source.clone(),
                        reason: "run has no workspace".to_string(),
                    });
                    continue;
                };

                let Some(archived) = archive_path(&result.name, source) else {
                    warn!(
                        stage = %result.name,
                        file = %source.display(),
                        "Artifact outside archive"
                    );
                    manifest.missing.push(MissingArtifact {
                        stage: result.name.clone(),
                        source: source.clone(),
                        reason: "path would leave the archive directory".to_string(),
                    });
                    continue;
                };
                match archive_file(&workspace.join(source), &output_dir.join(&archived)) {
                    Ok((size, sha256)) => {
                        debug!(
                            stage = %result.name,
                            file = %source.display(),
                            size,
                            "Archived artifact"
                        );
                        manifest.entries.push(ArchivedArtifact {
                            stage: result.name.clone(),
                            category: result.category.clone(),
                            source: source.clone(),
                            archived,
                            size,
                            sha256,
                        });
                    }
                    Err(e) => {
                        warn!(
                            stage = %result.name,
                            file = %source.display(),
                            error = %e,
                            "Artifact missing"
                        );
                        manifest.missing.push(MissingArtifact {
                            stage: result.name.clone(),
                            source: source.clone(),
                            reason: e.to_string(),
                        });
                    }
                }
            }
        }

        manifest.normalize();
        manifest.write()?;
        info!(
            archived = manifest.entries.len(),
            missing = manifest.missing.len(),
            root = %output_dir.display(),
            "Reports collected"
        );
        Ok(manifest)
    }
}

/// `<stage>/<source>`, provided the stage is one plain directory name and the
/// source stays below it.
fn archive_path(stage: &str, source: &Path) -> Option<PathBuf> {
    let mut stage_parts = Path::new(stage).components();
    let single = matches!(
        (stage_parts.next(), stage_parts.next()),
        (Some(Component::Normal(_)), None)
    );
    let relative = source.components().all(|c| matches!(c, Component::Normal(_)));
    (single && relative).then(|| Path::new(stage).join(source))
}

fn archive_file(source: &Path, dest: &Path) -> io::Result<(u64, String)> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    let size = fs::copy(source, dest)?;
    let mut hasher = Sha256::new();
    io::copy(&mut fs::File::open(dest)?, &mut hasher)?;
    Ok((size, hex::encode(hasher.finalize())))
}
