//! Archive manifest written next to the collected reports.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::errors::PipeguardError;

/// File name of the manifest inside the archive directory.
pub const MANIFEST_FILE: &str = "manifest.json";

/// One archived report file.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ArchivedArtifact {
    /// Stage that produced the file.
    pub stage: String,
    /// Artifact category.
    pub category: String,
    /// Workspace-relative source path.
    pub source: PathBuf,
    /// Archive-relative destination path.
    pub archived: PathBuf,
    /// Size in bytes.
    pub size: u64,
    /// Hex SHA-256 of the contents.
    pub sha256: String,
}

/// An artifact that was listed but could not be archived.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MissingArtifact {
    /// Stage that listed the file.
    pub stage: String,
    /// Workspace-relative source path.
    pub source: PathBuf,
    /// Why it was not archived.
    pub reason: String,
}

/// Mapping from stage outputs to archived copies.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveManifest {
    /// Archive root directory.
    pub root: PathBuf,
    /// Archived files.
    pub entries: Vec<ArchivedArtifact>,
    /// Files that could not be archived.
    pub missing: Vec<MissingArtifact>,
}

impl ArchiveManifest {
    /// Creates an empty manifest rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            entries: Vec::new(),
            missing: Vec::new(),
        }
    }

    /// Sorts entries so that the serialized form is deterministic.
    pub fn normalize(&mut self) {
        self.entries.sort();
        self.missing.sort();
    }

    /// Returns the archived file count per category.
    #[must_use]
    pub fn counts_by_category(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for entry in &self.entries {
            *counts.entry(entry.category.clone()).or_insert(0) += 1;
        }
        counts
    }

    /// Returns the absolute paths of archived files for `stage`.
    #[must_use]
    pub fn files_for_stage(&self, stage: &str) -> Vec<PathBuf> {
        self.entries
            .iter()
            .filter(|e| e.stage == stage)
            .map(|e| self.root.join(&e.archived))
            .collect()
    }

    /// Returns true if nothing was archived.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Serializes the manifest as pretty JSON.
    pub fn to_json(&self) -> Result<String, PipeguardError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Writes the manifest into its root directory.
    pub fn write(&self) -> Result<PathBuf, PipeguardError> {
        let path = self.root.join(MANIFEST_FILE);
        std::fs::write(&path, self.to_json()?)?;
        Ok(path)
    }

    /// Reads a manifest back from `dir`.
    pub fn read(dir: &Path) -> Result<Self, PipeguardError> {
        let contents = std::fs::read_to_string(dir.join(MANIFEST_FILE))?;
        Ok(serde_json::from_str(&contents)?)
    }
}
