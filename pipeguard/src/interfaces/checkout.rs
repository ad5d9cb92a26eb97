//! Source checkout provider invoked once before the first stage.

use async_trait::async_trait;
use std::path::PathBuf;

use crate::errors::PipeguardError;

/// Prepares the workspace the stages run in.
#[async_trait]
pub trait CheckoutProvider: Send + Sync {
    /// Returns the workspace path. Failures are fatal to the run.
    async fn checkout(&self) -> Result<PathBuf, PipeguardError>;
}

/// Uses an existing local directory as the workspace.
#[derive(Debug, Clone)]
pub struct LocalCheckout {
    path: PathBuf,
}

impl LocalCheckout {
    /// Creates a checkout of `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl CheckoutProvider for LocalCheckout {
    async fn checkout(&self) -> Result<PathBuf, PipeguardError> {
        let metadata = tokio::fs::metadata(&self.path).await.map_err(|e| {
            PipeguardError::Checkout(format!("{}: {e}", self.path.display()))
        })?;
        if !metadata.is_dir() {
            return Err(PipeguardError::Checkout(format!(
                "{} is not a directory",
                self.path.display()
            )));
        }
        Ok(tokio::fs::canonicalize(&self.path).await?)
    }
}
