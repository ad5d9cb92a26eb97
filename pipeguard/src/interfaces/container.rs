//! Container runtime used by the image build and deploy stages.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use super::executor::{CommandExecutor, CommandSpec};
use crate::errors::ContainerError;

/// A built image reference (e.g. `webapp:42`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageRef(pub String);

impl std::fmt::Display for ImageRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A host-to-container port mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMapping {
    /// Port on the host.
    pub host: u16,
    /// Port inside the container.
    pub container: u16,
}

/// A running container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerHandle {
    /// Runtime-assigned container id.
    pub id: String,
    /// Container name.
    pub name: String,
}

/// Builds images and manages containers.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Builds `image` from the build `context` directory.
    async fn build(&self, image: &str, context: &Path) -> Result<ImageRef, ContainerError>;

    /// Starts a detached container.
    async fn run(
        &self,
        image: &ImageRef,
        ports: &[PortMapping],
        name: &str,
    ) -> Result<ContainerHandle, ContainerError>;

    /// Stops a container.
    async fn stop(&self, handle: &ContainerHandle) -> Result<(), ContainerError>;

    /// Removes a stopped container.
    async fn remove(&self, handle: &ContainerHandle) -> Result<(), ContainerError>;
}

/// `ContainerRuntime` driving the `docker` CLI through a command executor.
#[derive(Clone)]
pub struct DockerCli {
    executor: Arc<dyn CommandExecutor>,
    binary: String,
    workdir: PathBuf,
    timeout: Duration,
}

impl DockerCli {
    /// Creates a runtime using `docker` from `PATH`.
    #[must_use]
    pub fn new(executor: Arc<dyn CommandExecutor>) -> Self {
        Self {
            executor,
            binary: "docker".to_string(),
            workdir: std::env::temp_dir(),
            timeout: Duration::from_secs(900),
        }
    }

    /// Uses a different CLI binary (e.g. `podman`).
    #[must_use]
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    /// Sets the timeout applied to each CLI call.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn invoke(&self, operation: &str, args: Vec<String>) -> Result<String, ContainerError> {
        let command = CommandSpec::new(&self.binary).with_args(args);
        let output = self
            .executor
            .execute(&command, &self.workdir, Some(self.timeout))
            .await?;

        if output.success() {
            Ok(output.stdout.trim().to_string())
        } else {
            Err(ContainerError::Failed {
                operation: operation.to_string(),
                exit_status: output.exit_status,
                stderr: output.stderr.trim().to_string(),
            })
        }
    }
}

impl std::fmt::Debug for DockerCli {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DockerCli")
            .field("binary", &self.binary)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    async fn build(&self, image: &str, context: &Path) -> Result<ImageRef, ContainerError> {
        info!(image = %image, context = %context.display(), "Building image");
        self.invoke(
            "build",
            vec![
                "build".to_string(),
                "-t".to_string(),
                image.to_string(),
                context.display().to_string(),
            ],
        )
        .await?;
        Ok(ImageRef(image.to_string()))
    }

    async fn run(
        &self,
        image: &ImageRef,
        ports: &[PortMapping],
        name: &str,
    ) -> Result<ContainerHandle, ContainerError> {
        let mut args = vec![
            "run".to_string(),
            "-d".to_string(),
            "--name".to_string(),
            name.to_string(),
        ];
        for port in ports {
            args.push("-p".to_string());
            args.push(format!("{}:{}", port.host, port.container));
        }
        args.push(image.0.clone());

        let id = self.invoke("run", args).await?;
        info!(container = %name, id = %id, "Container started");
        Ok(ContainerHandle {
            id,
            name: name.to_string(),
        })
    }

    async fn stop(&self, handle: &ContainerHandle) -> Result<(), ContainerError> {
        self.invoke("stop", vec!["stop".to_string(), handle.name.clone()])
            .await
            .map(|_| ())
    }

    async fn remove(&self, handle: &ContainerHandle) -> Result<(), ContainerError> {
        self.invoke("rm", vec!["rm".to_string(), "-f".to_string(), handle.name.clone()])
            .await
            .map(|_| ())
    }
}
