//! Runner configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

/// Environment variable overriding [`RunnerConfig::archive_dir`].
pub const ENV_ARCHIVE_DIR: &str = "PIPEGUARD_ARCHIVE_DIR";
/// Environment variable overriding [`RunnerConfig::finalize_timeout_secs`].
pub const ENV_FINALIZE_TIMEOUT: &str = "PIPEGUARD_FINALIZE_TIMEOUT_SECS";
/// Environment variable overriding [`RunnerConfig::cleanup_timeout_secs`].
pub const ENV_CLEANUP_TIMEOUT: &str = "PIPEGUARD_CLEANUP_TIMEOUT_SECS";

/// Settings for the runner's finalization phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Directory reports are archived into; a per-run subdirectory is created.
    #[serde(default = "default_archive_dir")]
    pub archive_dir: PathBuf,
    /// Bound on report collection and on notification, each.
    #[serde(default = "default_finalize_timeout")]
    pub finalize_timeout_secs: f64,
    /// Bound on all registered cleanup actions together.
    #[serde(default = "default_cleanup_timeout")]
    pub cleanup_timeout_secs: f64,
}

fn default_archive_dir() -> PathBuf {
    PathBuf::from("pipeguard-reports")
}

fn default_finalize_timeout() -> f64 {
    60.0
}

fn default_cleanup_timeout() -> f64 {
    30.0
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            archive_dir: default_archive_dir(),
            finalize_timeout_secs: default_finalize_timeout(),
            cleanup_timeout_secs: default_cleanup_timeout(),
        }
    }
}

impl RunnerConfig {
    /// Builds a configuration from defaults overridden by environment variables.
    ///
    /// Unparsable or non-positive timeouts are ignored with a warning.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a configuration from an arbitrary variable lookup.
    #[must_use]
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(dir) = lookup(ENV_ARCHIVE_DIR).filter(|d| !d.trim().is_empty()) {
            config.archive_dir = PathBuf::from(dir);
        }
        if let Some(secs) = parse_secs(&lookup, ENV_FINALIZE_TIMEOUT) {
            config.finalize_timeout_secs = secs;
        }
        if let Some(secs) = parse_secs(&lookup, ENV_CLEANUP_TIMEOUT) {
            config.cleanup_timeout_secs = secs;
        }
        config
    }

    /// Sets the archive directory.
    #[must_use]
    pub fn with_archive_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.archive_dir = dir.into();
        self
    }

    /// Sets the collection and notification timeout.
    #[must_use]
    pub fn with_finalize_timeout_secs(mut self, secs: f64) -> Self {
        self.finalize_timeout_secs = secs;
        self
    }

    /// Sets the cleanup timeout.
    #[must_use]
    pub fn with_cleanup_timeout_secs(mut self, secs: f64) -> Self {
        self.cleanup_timeout_secs = secs;
        self
    }

    /// Collection and notification timeout.
    #[must_use]
    pub fn finalize_timeout(&self) -> Duration {
        bounded(self.finalize_timeout_secs)
    }

    /// Cleanup timeout.
    #[must_use]
    pub fn cleanup_timeout(&self) -> Duration {
        bounded(self.cleanup_timeout_secs)
    }
}

/// Non-positive values mean no time at all; values too large for a
/// `Duration` saturate.
fn bounded(secs: f64) -> Duration {
    if secs.is_nan() || secs <= 0.0 {
        Duration::ZERO
    } else {
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
    }
}

fn parse_secs<F>(lookup: &F, key: &str) -> Option<f64>
where
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    match raw.trim().parse::<f64>() {
        Ok(secs) if secs > 0.0 && Duration::try_from_secs_f64(secs).is_ok() => Some(secs),
        _ => {
            warn!(variable = key, value = %raw, "Ignoring invalid timeout");
            None
        }
    }
}
