//! Collaborators that actually run modules: a container runtime and a pipeline engine

pub mod dagger;
pub mod docker;
pub mod process;

use crate::modules::error::BackendError;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub use dagger::DaggerCli;
pub use docker::DockerCli;

/// Captured result of a finished backend process
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProcessOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Cancellation and deadline shared by everything one run spawns
#[derive(Debug, Clone)]
pub struct RunControl {
    pub cancel: CancellationToken,
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MountKind {
    Bind,
    Volume,
    Tmpfs,
}

impl MountKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MountKind::Bind => "bind",
            MountKind::Volume => "volume",
            MountKind::Tmpfs => "tmpfs",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Mount {
    pub kind: MountKind,
    pub source: Option<String>,
    pub target: String,
    pub read_only: bool,
}

impl Mount {
    pub fn bind(source: impl Into<String>, target: impl Into<String>, read_only: bool) -> Self {
        Self {
            kind: MountKind::Bind,
            source: Some(source.into()),
            target: target.into(),
            read_only,
        }
    }

    fn to_docker_arg(&self) -> String {
        let mut parts = vec![format!("type={}", self.kind.as_str())];
        if let Some(source) = &self.source {
            parts.push(format!("source={source}"));
        }
        parts.push(format!("target={}", self.target));
        if self.read_only {
            parts.push("readonly".to_string());
        }
        parts.join(",")
    }
}

/// Everything needed for one `docker run`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ContainerRunSpec {
    pub name: String,
    pub image: String,
    pub entrypoint: Option<String>,
    pub args: Vec<String>,
    pub working_dir: Option<String>,
    pub env: BTreeMap<String, String>,
    pub mounts: Vec<Mount>,
    pub network_disabled: bool,
    pub labels: BTreeMap<String, String>,
}

impl ContainerRunSpec {
    pub fn to_docker_args(&self) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "--rm".to_string(),
            "--name".to_string(),
            self.name.clone(),
        ];
        for (key, value) in &self.labels {
            args.push("--label".to_string());
            args.push(format!("{key}={value}"));
        }
        if self.network_disabled {
            args.push("--network".to_string());
            args.push("none".to_string());
        }
        if let Some(dir) = &self.working_dir {
            args.push("--workdir".to_string());
            args.push(dir.clone());
        }
        for (key, value) in &self.env {
            args.push("--env".to_string());
            args.push(format!("{key}={value}"));
        }
        for mount in &self.mounts {
            args.push("--mount".to_string());
            args.push(mount.to_docker_arg());
        }
        if let Some(entrypoint) = &self.entrypoint {
            args.push("--entrypoint".to_string());
            args.push(entrypoint.clone());
        }
        args.push(self.image.clone());
        args.extend(self.args.iter().cloned());
        args
    }
}

/// One `dagger call`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PipelineInvocation {
    pub module: String,
    pub function: String,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
}

impl PipelineInvocation {
    pub fn to_dagger_args(&self) -> Vec<String> {
        let mut args = vec![
            "call".to_string(),
            "-m".to_string(),
            self.module.clone(),
            self.function.clone(),
        ];
        args.extend(self.args.iter().cloned());
        args
    }
}

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    fn name(&self) -> &str;

    async fn run(
        &self,
        spec: &ContainerRunSpec,
        control: &RunControl,
    ) -> Result<ProcessOutput, BackendError>;
}

#[async_trait]
pub trait PipelineEngine: Send + Sync {
    fn name(&self) -> &str;

    async fn call(
        &self,
        invocation: &PipelineInvocation,
        control: &RunControl,
    ) -> Result<ProcessOutput, BackendError>;
}
