//! HTTP liveness probe used by the health checker.

use async_trait::async_trait;

use crate::errors::ProbeError;

/// Issues a single GET against an endpoint.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HttpProbe: Send + Sync {
    /// Returns the HTTP status code, or an error if no response was received.
    async fn get(&self, url: &str) -> Result<u16, ProbeError>;
}

/// Returns true for a 2xx status.
#[must_use]
pub fn is_ready_status(status: u16) -> bool {
    (200..300).contains(&status)
}

#[cfg(feature = "http")]
pub use reqwest_probe::ReqwestProbe;

#[cfg(feature = "http")]
mod reqwest_probe {
    use super::{HttpProbe, ProbeError};
    use async_trait::async_trait;
    use std::time::Duration;

    /// `HttpProbe` backed by a shared `reqwest::Client`.
    #[derive(Debug, Clone)]
    pub struct ReqwestProbe {
        client: reqwest::Client,
    }

    impl ReqwestProbe {
        /// Creates a probe whose requests time out after `timeout`.
        pub fn new(timeout: Duration) -> Result<Self, ProbeError> {
            let client = reqwest::Client::builder()
                .timeout(timeout)
                .user_agent(concat!("pipeguard/", env!("CARGO_PKG_VERSION")))
                .build()
                .map_err(|e| ProbeError::Connect {
                    url: String::new(),
                    reason: e.to_string(),
                })?;
            Ok(Self { client })
        }

        /// Creates a probe around an existing client.
        #[must_use]
        pub fn with_client(client: reqwest::Client) -> Self {
            Self { client }
        }
    }

    #[async_trait]
    impl HttpProbe for ReqwestProbe {
        async fn get(&self, url: &str) -> Result<u16, ProbeError> {
            match self.client.get(url).send().await {
                Ok(response) => Ok(response.status().as_u16()),
                Err(e) if e.is_timeout() => Err(ProbeError::Timeout {
                    url: url.to_string(),
                }),
                Err(e) => Err(ProbeError::Connect {
                    url: url.to_string(),
                    reason: e.to_string(),
                }),
            }
        }
    }
}
