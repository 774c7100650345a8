//! Dispatching module commands to fake backends

mod common;

use async_trait::async_trait;
use common::{dagger_descriptor, docker_descriptor};
use serde_json::json;
use ship_modules::modules::backends::{
    ContainerRunSpec, ContainerRuntime, PipelineEngine, PipelineInvocation, ProcessOutput,
    RunControl,
};
use ship_modules::modules::{
    BackendError, ExecutionDispatcher, ExecutionError, MetadataLoader, Module, ModuleArgs,
    ModuleError, NotFoundError, RunContext, RunRequest, SourceKind, TrustEvaluator, TrustPolicy,
};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
struct RecordingRuntime {
    specs: Mutex<Vec<ContainerRunSpec>>,
    response: Option<Result<ProcessOutput, BackendError>>,
}

#[async_trait]
impl ContainerRuntime for RecordingRuntime {
    fn name(&self) -> &str {
        "fake-docker"
    }

    async fn run(
        &self,
        spec: &ContainerRunSpec,
        _control: &RunControl,
    ) -> Result<ProcessOutput, BackendError> {
        self.specs.lock().unwrap().push(spec.clone());
        self.response.clone().unwrap_or_else(|| {
            Ok(ProcessOutput {
                exit_code: 0,
                stdout: "ok\n".to_string(),
                stderr: String::new(),
            })
        })
    }
}

#[derive(Default)]
struct RecordingEngine {
    calls: Mutex<Vec<PipelineInvocation>>,
}

#[async_trait]
impl PipelineEngine for RecordingEngine {
    fn name(&self) -> &str {
        "fake-dagger"
    }

    async fn call(
        &self,
        invocation: &PipelineInvocation,
        _control: &RunControl,
    ) -> Result<ProcessOutput, BackendError> {
        self.calls.lock().unwrap().push(invocation.clone());
        Ok(ProcessOutput::default())
    }
}

/// Blocks until the run is cancelled
struct HangingRuntime;

#[async_trait]
impl ContainerRuntime for HangingRuntime {
    fn name(&self) -> &str {
        "hanging"
    }

    async fn run(
        &self,
        _spec: &ContainerRunSpec,
        control: &RunControl,
    ) -> Result<ProcessOutput, BackendError> {
        tokio::select! {
            _ = control.cancel.cancelled() => Err(BackendError::Cancelled),
            _ = tokio::time::sleep(Duration::from_secs(30)) => Ok(ProcessOutput::default()),
        }
    }
}

fn load(text: &str, source: SourceKind, policy: &TrustPolicy) -> Module {
    let mut module = MetadataLoader::new()
        .load_str(text, source, Some(PathBuf::from("/modules/m")), "test")
        .unwrap()
        .module;
    TrustEvaluator::new(policy.clone()).classify(&mut module);
    module
}

fn args(value: serde_json::Value) -> ModuleArgs {
    serde_json::from_value(value).unwrap()
}

fn dispatcher(
    policy: TrustPolicy,
    runtime: Arc<dyn ContainerRuntime>,
    engine: Arc<dyn PipelineEngine>,
) -> ExecutionDispatcher {
    ExecutionDispatcher::with_backends(policy, true, runtime, engine)
}

#[tokio::test]
async fn test_git_module_needs_trust() {
    let ctx = RunContext::new("/work");
    let strict = TrustPolicy::default();
    let module = load(&docker_descriptor("scanner", "1.0.0"), SourceKind::Git, &strict);
    assert!(!module.trusted);

    let runtime = Arc::new(RecordingRuntime::default());
    let engine = Arc::new(RecordingEngine::default());
    let err = dispatcher(strict, runtime.clone(), engine.clone())
        .run(&ctx, &module, "scan", &args(json!({"target": "."})))
        .await
        .unwrap_err();
    match err {
        ModuleError::Trust(trust) => {
            assert_eq!(trust.module, "scanner");
            assert_eq!(trust.kind, SourceKind::Git);
        }
        other => panic!("expected trust error, got {other:?}"),
    }
    assert!(runtime.specs.lock().unwrap().is_empty());

    let open = TrustPolicy {
        allow_untrusted: true,
        ..Default::default()
    };
    let output = dispatcher(open, runtime.clone(), engine)
        .run(&ctx, &module, "scan", &args(json!({"target": "."})))
        .await
        .unwrap();
    assert_eq!(output.stdout, "ok\n");
    assert_eq!(output.metadata["source"], "git");

    let specs = runtime.specs.lock().unwrap();
    assert_eq!(specs.len(), 1);
    assert_eq!(specs[0].image, "example/scanner:latest");
    assert_eq!(specs[0].args, vec!["scan", "--target", ".", "--format", "json"]);
    assert!(specs[0].network_disabled);
}

#[tokio::test]
async fn test_argument_errors_name_the_flag() {
    let ctx = RunContext::new("/work");
    let policy = TrustPolicy::default();
    let module = load(&docker_descriptor("scanner", "1.0.0"), SourceKind::Builtin, &policy);
    let runtime = Arc::new(RecordingRuntime::default());
    let d = dispatcher(policy, runtime.clone(), Arc::new(RecordingEngine::default()));

    match d.run(&ctx, &module, "scan", &ModuleArgs::new()).await {
        Err(ModuleError::Argument(e)) => {
            assert_eq!(e.violations.len(), 1);
            assert_eq!(e.violations[0].field, "target");
        }
        other => panic!("expected argument error, got {other:?}"),
    }

    match d
        .run(&ctx, &module, "scan", &args(json!({"target": ".", "format": "xml"})))
        .await
    {
        Err(ModuleError::Argument(e)) => {
            assert_eq!(e.violations.len(), 1);
            assert!(e.violations[0].message.contains("json, sarif"));
        }
        other => panic!("expected argument error, got {other:?}"),
    }

    assert!(matches!(
        d.run(&ctx, &module, "deploy", &ModuleArgs::new()).await,
        Err(ModuleError::NotFound(NotFoundError::Command { .. }))
    ));
    assert!(runtime.specs.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_backend_failures_are_wrapped() {
    let ctx = RunContext::new("/work");
    let policy = TrustPolicy::default();
    let module = load(&docker_descriptor("scanner", "1.0.0"), SourceKind::Builtin, &policy);
    let argv = args(json!({"target": "."}));

    let failing = Arc::new(RecordingRuntime {
        response: Some(Ok(ProcessOutput {
            exit_code: 2,
            stdout: String::new(),
            stderr: "boom".to_string(),
        })),
        ..Default::default()
    });
    let err = dispatcher(policy.clone(), failing, Arc::new(RecordingEngine::default()))
        .run(&ctx, &module, "scan", &argv)
        .await
        .unwrap_err();
    match err {
        ModuleError::Execution(e @ ExecutionError::NonZeroExit { .. }) => {
            assert_eq!(e.exit_code(), Some(2));
            assert!(e.to_string().contains("boom"));
        }
        other => panic!("expected non-zero exit, got {other:?}"),
    }

    let missing = Arc::new(RecordingRuntime {
        response: Some(Err(BackendError::NotInstalled {
            binary: "docker".to_string(),
        })),
        ..Default::default()
    });
    let err = dispatcher(policy, missing, Arc::new(RecordingEngine::default()))
        .run(&ctx, &module, "scan", &argv)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ModuleError::Execution(ExecutionError::Backend {
            cause: BackendError::NotInstalled { .. },
            ..
        })
    ));
}

#[tokio::test]
async fn test_dagger_module_routes_to_engine() {
    let ctx = RunContext::new("/work");
    let policy = TrustPolicy::default().allow("pipeline");
    let module = load(&dagger_descriptor("pipeline"), SourceKind::Project, &policy);
    assert!(module.trusted);

    let runtime = Arc::new(RecordingRuntime::default());
    let engine = Arc::new(RecordingEngine::default());
    dispatcher(policy, runtime.clone(), engine.clone())
        .run(&ctx, &module, "run", &ModuleArgs::new())
        .await
        .unwrap();

    let calls = engine.calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].module, "github.com/example/pipeline");
    assert_eq!(calls[0].function, "audit");
    assert!(runtime.specs.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_batch_results_keep_request_order() {
    let ctx = RunContext::new("/work");
    let policy = TrustPolicy::default();
    let trusted = load(&docker_descriptor("a", "1"), SourceKind::Builtin, &policy);
    let untrusted = load(&docker_descriptor("b", "1"), SourceKind::User, &policy);
    let runtime = Arc::new(RecordingRuntime::default());
    let d = dispatcher(policy, runtime.clone(), Arc::new(RecordingEngine::default()));

    let requests = vec![
        RunRequest {
            module: untrusted,
            command: "scan".to_string(),
            args: args(json!({"target": "."})),
        },
        RunRequest {
            module: trusted,
            command: "scan".to_string(),
            args: args(json!({"target": "."})),
        },
    ];
    let results = d.run_batch(&ctx, &requests).await;

    assert_eq!(results.len(), 2);
    assert!(matches!(results[0], Err(ModuleError::Trust(_))));
    assert_eq!(results[1].as_ref().unwrap().module, "a");
    assert_eq!(runtime.specs.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_cancellation_reaches_backend() {
    let ctx = RunContext::new("/work");
    let policy = TrustPolicy::default();
    let module = load(&docker_descriptor("slow", "1"), SourceKind::Builtin, &policy);
    let d = dispatcher(
        policy,
        Arc::new(HangingRuntime),
        Arc::new(RecordingEngine::default()),
    );
    let argv = args(json!({"target": "."}));

    let (result, _) = tokio::join!(d.run(&ctx, &module, "scan", &argv), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        ctx.cancel.cancel();
    });

    assert!(matches!(
        result,
        Err(ModuleError::Execution(ExecutionError::Backend {
            cause: BackendError::Cancelled,
            ..
        }))
    ));
}

#[tokio::test]
async fn test_sandboxed_host_root_volume_never_reaches_runtime() {
    let ctx = RunContext::new("/work");
    let policy = TrustPolicy {
        allow_untrusted: true,
        ..Default::default()
    };
    let descriptor = r#"
metadata: {name: escaper, version: "1"}
spec:
  type: docker
  docker:
    image: alpine
    volumes:
      - {source: /, target: /host}
  commands: [{name: run}]
"#;
    let module = load(descriptor, SourceKind::Project, &policy);

    let runtime = Arc::new(RecordingRuntime::default());
    let err = dispatcher(policy, runtime.clone(), Arc::new(RecordingEngine::default()))
        .run(&ctx, &module, "run", &ModuleArgs::new())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ModuleError::Execution(ExecutionError::Sandbox { .. })
    ));
    assert!(runtime.specs.lock().unwrap().is_empty());
}
