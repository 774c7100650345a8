use crate::modules::backends::process::run_process;
use crate::modules::backends::{ContainerRunSpec, ContainerRuntime, ProcessOutput, RunControl};
use crate::modules::error::BackendError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Runs containers through the `docker` command line client
#[derive(Debug, Clone)]
pub struct DockerCli {
    binary: Option<PathBuf>,
}

impl DockerCli {
    /// Locate `docker` on PATH; a missing binary only fails at run time
    pub fn detect() -> Self {
        Self {
            binary: which::which("docker").ok(),
        }
    }

    pub fn with_binary(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: Some(binary.into()),
        }
    }

    pub fn is_available(&self) -> bool {
        self.binary.is_some()
    }

    /// Killing the client does not stop the container; remove it explicitly
    async fn remove_container(&self, binary: &Path, name: &str) {
        let args = vec!["rm".to_string(), "-f".to_string(), name.to_string()];
        match run_process(binary, &args, None, &CancellationToken::new(), None).await {
            Ok(output) if output.exit_code == 0 => debug!("Removed container {}", name),
            Ok(output) => debug!("docker rm {} exited {}", name, output.exit_code),
            Err(e) => warn!("Failed to remove container {}: {}", name, e),
        }
    }
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    fn name(&self) -> &str {
        "docker"
    }

    async fn run(
        &self,
        spec: &ContainerRunSpec,
        control: &RunControl,
    ) -> Result<ProcessOutput, BackendError> {
        let binary = self.binary.as_ref().ok_or_else(|| BackendError::NotInstalled {
            binary: "docker".to_string(),
        })?;

        let result = run_process(
            binary,
            &spec.to_docker_args(),
            None,
            &control.cancel,
            control.timeout,
        )
        .await;

        if matches!(
            result,
            Err(BackendError::Cancelled) | Err(BackendError::TimedOut { .. })
        ) {
            self.remove_container(binary, &spec.name).await;
        }
        result
    }
}
