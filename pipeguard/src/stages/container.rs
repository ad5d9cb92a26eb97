//! Image build and deploy stages.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{Stage, StageContext, StageOutcome, TIMEOUT_EXIT_STATUS};
use crate::errors::{ContainerError, ExecutorError, StageError};
use crate::interfaces::{ContainerHandle, ContainerRuntime, ImageRef, PortMapping};
use crate::pipeline::StageDetail;

/// Turns a runtime error into an outcome, or a tool crash if the runtime
/// could not be invoked.
fn failure_outcome(ctx: &StageContext, err: ContainerError) -> Result<StageOutcome, StageError> {
    match err {
        ContainerError::Failed {
            operation,
            exit_status,
            stderr,
        } => {
            let last_line = stderr.lines().last().unwrap_or_default();
            Ok(StageOutcome::exit(exit_status)
                .with_note(format!("{operation} failed: {last_line}")))
        }
        ContainerError::Executor(ExecutorError::Timeout { timeout_secs, .. }) => {
            Ok(StageOutcome::exit(TIMEOUT_EXIT_STATUS)
                .with_note(format!("container runtime timed out after {timeout_secs}s")))
        }
        ContainerError::Executor(e) => Err(StageError::tool_crash(&ctx.stage_name, e.to_string())),
    }
}

/// Builds the application image.
pub struct BuildImageStage {
    runtime: Arc<dyn ContainerRuntime>,
    image: String,
    context: PathBuf,
}

impl BuildImageStage {
    /// Creates a build stage; `context` is relative to the workspace.
    #[must_use]
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        image: impl Into<String>,
        context: impl Into<PathBuf>,
    ) -> Self {
        Self {
            runtime,
            image: image.into(),
            context: context.into(),
        }
    }
}

impl std::fmt::Debug for BuildImageStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildImageStage")
            .field("image", &self.image)
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Stage for BuildImageStage {
    fn kind(&self) -> &str {
        "build_image"
    }

    async fn execute(&self, ctx: &StageContext) -> Result<StageOutcome, StageError> {
        let image = ctx.expand(&self.image);
        match self.runtime.build(&image, &ctx.workspace.join(&self.context)).await {
            Ok(image) => Ok(StageOutcome::success().with_detail(StageDetail::Image { image })),
            Err(e) => failure_outcome(ctx, e),
        }
    }
}

/// Starts the application container and registers its teardown.
///
/// A stale container with the same name is removed first. The started
/// container is stopped and removed during finalization.
pub struct DeployStage {
    runtime: Arc<dyn ContainerRuntime>,
    image: String,
    container_name: String,
    ports: Vec<PortMapping>,
}

impl DeployStage {
    /// Creates a deploy stage.
    #[must_use]
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        image: impl Into<String>,
        container_name: impl Into<String>,
        ports: Vec<PortMapping>,
    ) -> Self {
        Self {
            runtime,
            image: image.into(),
            container_name: container_name.into(),
            ports,
        }
    }
}

impl std::fmt::Debug for DeployStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeployStage")
            .field("image", &self.image)
            .field("container_name", &self.container_name)
            .field("ports", &self.ports)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Stage for DeployStage {
    fn kind(&self) -> &str {
        "deploy"
    }

    async fn execute(&self, ctx: &StageContext) -> Result<StageOutcome, StageError> {
        let image = ImageRef(ctx.expand(&self.image));
        let name = ctx.expand(&self.container_name);

        let stale = ContainerHandle {
            id: name.clone(),
            name: name.clone(),
        };
        if let Err(e) = self.runtime.remove(&stale).await {
            debug!(container = %name, error = %e, "No stale container removed");
        }

        let handle = match self.runtime.run(&image, &self.ports, &name).await {
            Ok(handle) => handle,
            Err(e) => return failure_outcome(ctx, e),
        };

        let runtime = self.runtime.clone();
        let teardown = handle.clone();
        ctx.cleanup.register(format!("container:{name}"), move || async move {
            if let Err(e) = runtime.stop(&teardown).await {
                warn!(container = %teardown.name, error = %e, "Stopping container failed");
            }
            let removed = runtime.remove(&teardown).await.map_err(|e| e.to_string());
            if removed.is_ok() {
                info!(container = %teardown.name, "Container removed");
            }
            removed
        });

        Ok(StageOutcome::success().with_detail(StageDetail::Container { container: handle }))
    }
}
