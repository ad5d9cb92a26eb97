//! Readiness polling for deployed endpoints.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::cancellation::CancellationToken;
use crate::errors::ConfigurationError;
use crate::interfaces::{is_ready_status, HttpProbe};

/// Outcome of a readiness wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheckResult {
    /// Whether a 2xx answer was observed.
    pub ready: bool,
    /// Probes issued; never more than the configured maximum.
    pub attempts: u32,
    /// Total time spent waiting.
    pub elapsed_ms: u64,
    /// Last HTTP status seen, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_status: Option<u16>,
    /// True if the wait was interrupted by cancellation.
    #[serde(default)]
    pub cancelled: bool,
}

/// Polls an endpoint through an [`HttpProbe`].
#[derive(Clone)]
pub struct HealthChecker {
    probe: Arc<dyn HttpProbe>,
}

impl HealthChecker {
    /// Creates a checker using `probe`.
    #[must_use]
    pub fn new(probe: Arc<dyn HttpProbe>) -> Self {
        Self { probe }
    }

    /// Probes `endpoint` until it answers 2xx or `max_attempts` probes were made.
    ///
    /// Sleeps `interval` between probes, never after the last one. Connection
    /// errors count as "not ready". A cancelled `cancel` token stops the wait
    /// before the next probe.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigurationError`] when `max_attempts` is zero.
    pub async fn wait_until_ready(
        &self,
        endpoint: &str,
        max_attempts: u32,
        interval: Duration,
        cancel: Option<&CancellationToken>,
    ) -> Result<HealthCheckResult, ConfigurationError> {
        if max_attempts == 0 {
            return Err(ConfigurationError::zero_attempts(endpoint));
        }

        let started = Instant::now();
        let mut result = HealthCheckResult {
            ready: false,
            attempts: 0,
            elapsed_ms: 0,
            last_status: None,
            cancelled: false,
        };

        for attempt in 1..=max_attempts {
            if cancel.is_some_and(CancellationToken::is_cancelled) {
                result.cancelled = true;
                break;
            }

            result.attempts = attempt;
            match self.probe.get(endpoint).await {
                Ok(status) if is_ready_status(status) => {
                    result.ready = true;
                    result.last_status = Some(status);
                    break;
                }
                Ok(status) => {
                    debug!(endpoint, attempt, status, "Endpoint not ready");
                    result.last_status = Some(status);
                }
                Err(e) => debug!(endpoint, attempt, error = %e, "Endpoint unreachable"),
            }

            if attempt < max_attempts {
                let slept = match cancel {
                    Some(token) => token.sleep(interval).await,
                    None => {
                        tokio::time::sleep(interval).await;
                        true
                    }
                };
                if !slept {
                    result.cancelled = true;
                    break;
                }
            }
        }

        result.elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        if result.ready {
            info!(endpoint, attempts = result.attempts, "Endpoint ready");
        } else {
            warn!(
                endpoint,
                attempts = result.attempts,
                cancelled = result.cancelled,
                "Endpoint never became ready"
            );
        }
        Ok(result)
    }
}

impl std::fmt::Debug for HealthChecker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthChecker").finish_non_exhaustive()
    }
}
