//! Analysis report source consulted by the quality gate.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::AnalysisError;

/// Status reported by the static-analysis system for a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnalysisStatus {
    /// Quality gate passed.
    Pass,
    /// Quality gate failed.
    Fail,
    /// Analysis still being computed.
    Pending,
}

/// Fetches the quality-gate status of a project.
#[async_trait]
pub trait AnalysisSource: Send + Sync {
    /// Returns the current status; `Pending` means "ask again later".
    async fn fetch_status(&self, project_key: &str) -> Result<AnalysisStatus, AnalysisError>;
}

/// Maps a SonarQube `projectStatus.status` value.
#[must_use]
pub fn parse_sonar_status(status: &str) -> AnalysisStatus {
    match status {
        "OK" | "WARN" => AnalysisStatus::Pass,
        "ERROR" => AnalysisStatus::Fail,
        _ => AnalysisStatus::Pending,
    }
}

#[cfg(feature = "http")]
pub use sonar::SonarQubeSource;

#[cfg(feature = "http")]
mod sonar {
    use super::{parse_sonar_status, AnalysisError, AnalysisSource, AnalysisStatus};
    use async_trait::async_trait;
    use tracing::debug;

    /// `AnalysisSource` reading SonarQube's project quality-gate status.
    #[derive(Debug, Clone)]
    pub struct SonarQubeSource {
        base_url: String,
        token: Option<String>,
        client: reqwest::Client,
    }

    impl SonarQubeSource {
        /// Creates a source for the server at `base_url`.
        #[must_use]
        pub fn new(base_url: impl Into<String>) -> Self {
            Self {
                base_url: base_url.into().trim_end_matches('/').to_string(),
                token: None,
                client: reqwest::Client::new(),
            }
        }

        /// Authenticates requests with a user token.
        #[must_use]
        pub fn with_token(mut self, token: impl Into<String>) -> Self {
            self.token = Some(token.into());
            self
        }
    }

    #[async_trait]
    impl AnalysisSource for SonarQubeSource {
        async fn fetch_status(&self, project_key: &str) -> Result<AnalysisStatus, AnalysisError> {
            let url = format!("{}/api/qualitygates/project_status", self.base_url);
            let mut request = self.client.get(&url).query(&[("projectKey", project_key)]);
            if let Some(ref token) = self.token {
                request = request.basic_auth(token, Some(""));
            }

            let response = request
                .send()
                .await
                .map_err(|e| AnalysisError::Unavailable(e.to_string()))?;

            // Analysis not yet available for the project.
            if response.status() == reqwest::StatusCode::NOT_FOUND {
                return Ok(AnalysisStatus::Pending);
            }
            if !response.status().is_success() {
                return Err(AnalysisError::Unavailable(format!(
                    "HTTP {}",
                    response.status().as_u16()
                )));
            }

            let body: serde_json::Value = response
                .json()
                .await
                .map_err(|e| AnalysisError::Malformed(e.to_string()))?;
            let status = body
                .pointer("/projectStatus/status")
                .and_then(serde_json::Value::as_str)
                .ok_or_else(|| {
                    AnalysisError::Malformed("missing projectStatus.status".to_string())
                })?;

            debug!(project = %project_key, status = %status, "Quality gate status fetched");
            Ok(parse_sonar_status(status))
        }
    }
}
