//! Runs one command of a loaded module on the matching backend

use crate::config::ModuleConfig;
use crate::modules::arguments::{validate_arguments, ModuleArgs, ValidatedArgs};
use crate::modules::backends::{
    ContainerRunSpec, ContainerRuntime, DaggerCli, DockerCli, Mount, MountKind, PipelineEngine,
    PipelineInvocation, ProcessOutput, RunControl,
};
use crate::modules::error::{BackendError, ExecutionError, ModuleError, NotFoundError, TrustError};
use crate::modules::trust::TrustPolicy;
use crate::modules::types::{
    Backend, DaggerConfig, DockerConfig, Module, Permission, VolumeKind,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const DEFAULT_CONTAINER_WORKDIR: &str = "/workspace";
const DOCKER_SOCKET: &str = "/var/run/docker.sock";

/// Cancellation, deadline and host directory for one invocation
#[derive(Debug, Clone)]
pub struct RunContext {
    pub cancel: CancellationToken,
    pub timeout: Option<Duration>,
    pub working_dir: PathBuf,
}

impl RunContext {
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            cancel: CancellationToken::new(),
            timeout: None,
            working_dir: working_dir.into(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Same deadline and directory, cancelled along with `self`
    pub fn child(&self) -> Self {
        Self {
            cancel: self.cancel.child_token(),
            timeout: self.timeout,
            working_dir: self.working_dir.clone(),
        }
    }

    fn control(&self) -> RunControl {
        RunControl {
            cancel: self.cancel.clone(),
            timeout: self.timeout,
        }
    }
}

/// Progress of a single run; every failure jumps straight to `Failed`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Resolved,
    Validated,
    TrustChecked,
    Dispatched,
    Succeeded,
    Failed,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunState::Resolved => "resolved",
            RunState::Validated => "validated",
            RunState::TrustChecked => "trust-checked",
            RunState::Dispatched => "dispatched",
            RunState::Succeeded => "succeeded",
            RunState::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionOutput {
    pub module: String,
    pub command: String,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
    pub metadata: BTreeMap<String, String>,
}

/// One entry of a batch run
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub module: Module,
    pub command: String,
    pub args: ModuleArgs,
}

pub struct ExecutionDispatcher {
    policy: TrustPolicy,
    sandbox: bool,
    runtime: Arc<dyn ContainerRuntime>,
    engine: Arc<dyn PipelineEngine>,
}

impl ExecutionDispatcher {
    /// Dispatcher backed by the `docker` and `dagger` clients on PATH
    pub fn new(policy: TrustPolicy, sandbox: bool) -> Self {
        Self::with_backends(
            policy,
            sandbox,
            Arc::new(DockerCli::detect()),
            Arc::new(DaggerCli::detect()),
        )
    }

    pub fn with_backends(
        policy: TrustPolicy,
        sandbox: bool,
        runtime: Arc<dyn ContainerRuntime>,
        engine: Arc<dyn PipelineEngine>,
    ) -> Self {
        Self {
            policy,
            sandbox,
            runtime,
            engine,
        }
    }

    pub fn from_config(config: &ModuleConfig) -> Self {
        Self::new(TrustPolicy::from_config(config), config.sandbox)
    }

    pub fn policy(&self) -> &TrustPolicy {
        &self.policy
    }

    /// Validate, trust-check and execute `command` of `module`
    ///
    /// Runs exactly once; retrying is left to the caller.
    pub async fn run(
        &self,
        ctx: &RunContext,
        module: &Module,
        command: &str,
        args: &ModuleArgs,
    ) -> Result<ExecutionOutput, ModuleError> {
        let started = Instant::now();
        let result = self.run_inner(ctx, module, command, args, started).await;
        if let Err(e) = &result {
            debug!("{} {}: {} ({})", module.name(), command, RunState::Failed, e);
        }
        result
    }

    async fn run_inner(
        &self,
        ctx: &RunContext,
        module: &Module,
        command_name: &str,
        args: &ModuleArgs,
        started: Instant,
    ) -> Result<ExecutionOutput, ModuleError> {
        let transition = |state: RunState| {
            debug!("{} {}: {}", module.name(), command_name, state);
        };

        let command = module
            .spec
            .command(command_name)
            .ok_or_else(|| NotFoundError::Command {
                module: module.name().to_string(),
                command: command_name.to_string(),
            })?;
        transition(RunState::Resolved);

        let validated = validate_arguments(module.name(), command, args)?;
        transition(RunState::Validated);

        if !(module.trusted || self.policy.permits(module.name())) {
            return Err(TrustError {
                module: module.name().to_string(),
                kind: module.source,
            }
            .into());
        }
        transition(RunState::TrustChecked);

        let backend_name;
        let mut metadata = BTreeMap::new();
        metadata.insert("source".to_string(), module.source.to_string());
        metadata.insert("type".to_string(), module.module_type().to_string());

        info!("Running {} {}", module.name(), command_name);
        let outcome = match &module.spec.backend {
            Backend::Docker(config) => {
                let spec = self.container_spec(ctx, module, config, command_name, &validated)?;
                metadata.insert("image".to_string(), spec.image.clone());
                metadata.insert("container".to_string(), spec.name.clone());
                backend_name = self.runtime.name().to_string();
                transition(RunState::Dispatched);
                self.runtime.run(&spec, &ctx.control()).await
            }
            Backend::Dagger(config) => {
                let invocation = pipeline_invocation(ctx, module, config, command_name, &validated);
                metadata.insert("dagger_module".to_string(), invocation.module.clone());
                metadata.insert("function".to_string(), invocation.function.clone());
                backend_name = self.engine.name().to_string();
                transition(RunState::Dispatched);
                self.engine.call(&invocation, &ctx.control()).await
            }
        };

        let output = self.finish(module, command_name, &backend_name, outcome)?;
        transition(RunState::Succeeded);

        Ok(ExecutionOutput {
            module: module.name().to_string(),
            command: command_name.to_string(),
            exit_code: output.exit_code,
            stdout: output.stdout,
            stderr: output.stderr,
            duration: started.elapsed(),
            metadata,
        })
    }

    fn finish(
        &self,
        module: &Module,
        command: &str,
        backend: &str,
        outcome: Result<ProcessOutput, BackendError>,
    ) -> Result<ProcessOutput, ExecutionError> {
        match outcome {
            Ok(output) if output.exit_code == 0 => Ok(output),
            Ok(output) => {
                warn!(
                    "{} {} exited with code {}",
                    module.name(),
                    command,
                    output.exit_code
                );
                Err(ExecutionError::NonZeroExit {
                    module: module.name().to_string(),
                    command: command.to_string(),
                    exit_code: output.exit_code,
                    stdout: output.stdout,
                    stderr: output.stderr,
                })
            }
            Err(cause) => Err(ExecutionError::Backend {
                module: module.name().to_string(),
                command: command.to_string(),
                backend: backend.to_string(),
                cause,
            }),
        }
    }

    /// Run independent invocations concurrently; results keep request order
    pub async fn run_batch(
        &self,
        ctx: &RunContext,
        requests: &[RunRequest],
    ) -> Vec<Result<ExecutionOutput, ModuleError>> {
        let runs = requests.iter().map(|request| {
            let ctx = ctx.child();
            async move {
                self.run(&ctx, &request.module, &request.command, &request.args)
                    .await
            }
        });
        futures::future::join_all(runs).await
    }

    /// Build the `docker run` description for one invocation
    ///
    /// Under the sandbox, bind volumes need a filesystem permission, stay
    /// read-only without `filesystem:write` and must resolve inside the
    /// working directory.
    pub fn container_spec(
        &self,
        ctx: &RunContext,
        module: &Module,
        config: &DockerConfig,
        command: &str,
        args: &ValidatedArgs,
    ) -> Result<ContainerRunSpec, ExecutionError> {
        let spec = &module.spec;
        let container_dir = config
            .working_dir
            .clone()
            .unwrap_or_else(|| DEFAULT_CONTAINER_WORKDIR.to_string());

        let (entrypoint, mut process_args) = match config.entrypoint.split_first() {
            Some((first, rest)) => (Some(first.clone()), rest.to_vec()),
            None => (None, Vec::new()),
        };
        process_args.push(command.to_string());
        process_args.extend(args.to_cli_args());

        let inherit_env = !self.sandbox || spec.has_permission(Permission::Environment);
        let mut env = BTreeMap::new();
        for (key, value) in &config.env {
            if !value.is_empty() {
                env.insert(key.clone(), value.clone());
            } else if inherit_env {
                match std::env::var(key) {
                    Ok(host) => {
                        env.insert(key.clone(), host);
                    }
                    Err(_) => debug!("Host variable {} is not set", key),
                }
            }
        }
        env.insert("SHIP_COMMAND".to_string(), command.to_string());
        env.insert("SHIP_MODULE".to_string(), module.name().to_string());
        env.extend(args.to_env());

        let host_dir = ctx.working_dir.display().to_string();
        let mut mounts = Vec::new();
        let workspace_access = if !self.sandbox || spec.has_permission(Permission::FilesystemWrite)
        {
            Some(false)
        } else if spec.has_permission(Permission::FilesystemRead) {
            Some(true)
        } else {
            None
        };
        if let Some(read_only) = workspace_access {
            mounts.push(Mount::bind(host_dir, container_dir.clone(), read_only));
        }
        if spec.has_permission(Permission::Docker) {
            mounts.push(Mount::bind(DOCKER_SOCKET, DOCKER_SOCKET, false));
        }
        for volume in &config.volumes {
            let mount = match volume.kind {
                VolumeKind::Bind => self.bind_volume(ctx, module, &volume.source, &volume.target)?,
                VolumeKind::Volume => Mount {
                    kind: MountKind::Volume,
                    source: Some(volume.source.clone()),
                    target: volume.target.clone(),
                    read_only: false,
                },
                VolumeKind::Tmpfs => Mount {
                    kind: MountKind::Tmpfs,
                    source: None,
                    target: volume.target.clone(),
                    read_only: false,
                },
            };
            mounts.push(mount);
        }

        let mut labels = BTreeMap::new();
        labels.insert("ship.module".to_string(), module.name().to_string());
        labels.insert("ship.command".to_string(), command.to_string());

        Ok(ContainerRunSpec {
            name: container_name(module.name()),
            image: config.image.clone(),
            entrypoint,
            args: process_args,
            working_dir: Some(container_dir),
            env,
            mounts,
            network_disabled: self.sandbox && !spec.has_permission(Permission::Network),
            labels,
        })
    }

    fn bind_volume(
        &self,
        ctx: &RunContext,
        module: &Module,
        source: &str,
        target: &str,
    ) -> Result<Mount, ExecutionError> {
        let host = normalize(&ctx.working_dir.join(source));
        if !self.sandbox {
            return Ok(Mount::bind(host.display().to_string(), target, false));
        }

        let denied = |action: String| ExecutionError::Sandbox {
            module: module.name().to_string(),
            action,
        };
        let writable = module.spec.has_permission(Permission::FilesystemWrite);
        if !writable && !module.spec.has_permission(Permission::FilesystemRead) {
            return Err(denied(format!(
                "bind-mount {source} without a filesystem permission"
            )));
        }
        if !host.starts_with(normalize(&ctx.working_dir)) {
            return Err(denied(format!(
                "bind-mount {} outside the working directory",
                host.display()
            )));
        }
        Ok(Mount::bind(host.display().to_string(), target, !writable))
    }
}

/// Lexically resolve `.` and `..` without touching the filesystem
fn normalize(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

/// Build the `dagger call` description for one invocation
pub fn pipeline_invocation(
    ctx: &RunContext,
    module: &Module,
    config: &DaggerConfig,
    command: &str,
    args: &ValidatedArgs,
) -> PipelineInvocation {
    let base = module.path.as_deref().unwrap_or(&ctx.working_dir);
    let reference = if is_local_reference(&config.module) {
        resolve_host_path(base, &config.module)
    } else {
        config.module.clone()
    };

    PipelineInvocation {
        module: reference,
        function: config
            .function
            .clone()
            .unwrap_or_else(|| command.to_string()),
        args: args.to_cli_args(),
        working_dir: ctx.working_dir.clone(),
    }
}

fn is_local_reference(reference: &str) -> bool {
    reference.starts_with("./") || reference.starts_with("../") || reference == "."
}

fn resolve_host_path(base: &Path, path: &str) -> String {
    let candidate = Path::new(path);
    if candidate.is_absolute() {
        path.to_string()
    } else {
        base.join(candidate).display().to_string()
    }
}

fn container_name(module: &str) -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("ship-{}-{}", module, &id[..8])
}
