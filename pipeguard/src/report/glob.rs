//! Artifact glob patterns resolved against the workspace.
//!
//! Supported syntax: `*` (within one path component), `**` (any number of
//! components), `?` (one character). Patterns are relative to the workspace
//! and always use `/` as the separator.

use regex::Regex;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::errors::{codes, ConfigurationError};

/// A compiled artifact pattern.
#[derive(Debug, Clone)]
pub struct ArtifactPattern {
    raw: String,
    base: PathBuf,
    regex: Regex,
}

impl ArtifactPattern {
    /// Compiles a glob pattern.
    pub fn new(pattern: &str) -> Result<Self, ConfigurationError> {
        let trimmed = pattern.trim().trim_start_matches("./");
        if trimmed.is_empty() || trimmed.starts_with('/') || trimmed.split('/').any(|c| c == "..") {
            return Err(ConfigurationError::new(
                codes::ARTIFACT,
                format!(
                    "Artifact pattern '{pattern}' must be a relative path inside the workspace"
                ),
            ));
        }

        let regex = Regex::new(&glob_to_regex(trimmed)).map_err(|e| {
            ConfigurationError::new(codes::ARTIFACT, format!("Invalid pattern '{pattern}': {e}"))
        })?;

        let base: PathBuf = trimmed
            .split('/')
            .take_while(|c| !c.contains(['*', '?']))
            .collect();
        // A literal pattern names a file; walk from its parent.
        let base = if base.as_os_str().len() == trimmed.len() {
            base.parent().map(Path::to_path_buf).unwrap_or_default()
        } else {
            base
        };

        Ok(Self {
            raw: trimmed.to_string(),
            base,
            regex,
        })
    }

    /// Returns the pattern as written.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Returns true if the workspace-relative path matches.
    #[must_use]
    pub fn matches(&self, relative: &str) -> bool {
        self.regex.is_match(relative)
    }

    /// Returns the workspace-relative files matching this pattern.
    #[must_use]
    pub fn resolve(&self, workspace: &Path) -> Vec<PathBuf> {
        let root = workspace.join(&self.base);
        if !root.exists() {
            return Vec::new();
        }

        WalkDir::new(&root)
            .follow_links(false)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_file())
            .filter_map(|entry| {
                let relative = entry.path().strip_prefix(workspace).ok()?.to_path_buf();
                let key = to_slash(&relative);
                self.matches(&key).then_some(relative)
            })
            .collect()
    }
}

/// Resolves all patterns, returning sorted, de-duplicated workspace-relative paths.
#[must_use]
pub fn resolve_artifacts(workspace: &Path, patterns: &[ArtifactPattern]) -> Vec<PathBuf> {
    let mut paths: Vec<PathBuf> = patterns
        .iter()
        .flat_map(|pattern| pattern.resolve(workspace))
        .collect();
    paths.sort();
    paths.dedup();
    paths
}

fn to_slash(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn glob_to_regex(glob: &str) -> String {
    let mut out = String::with_capacity(glob.len() * 2);
    out.push('^');
    let chars: Vec<char> = glob.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '*' if chars.get(i + 1) == Some(&'*') => {
                // `**/` matches zero or more whole components.
                if chars.get(i + 2) == Some(&'/') {
                    out.push_str("(?:.*/)?");
                    i += 3;
                } else {
                    out.push_str(".*");
                    i += 2;
                }
                continue;
            }
            '*' => out.push_str("[^/]*"),
            '?' => out.push_str("[^/]"),
            c => out.push_str(&regex::escape(&c.to_string())),
        }
        i += 1;
    }
    out.push('$');
    out
}
