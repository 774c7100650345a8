use crate::modules::backends::process::run_process;
use crate::modules::backends::{PipelineEngine, PipelineInvocation, ProcessOutput, RunControl};
use crate::modules::error::BackendError;
use async_trait::async_trait;
use std::path::PathBuf;

/// Calls module functions through the `dagger` command line client
#[derive(Debug, Clone)]
pub struct DaggerCli {
    binary: Option<PathBuf>,
}

impl DaggerCli {
    pub fn detect() -> Self {
        Self {
            binary: which::which("dagger").ok(),
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
}

#[async_trait]
impl PipelineEngine for DaggerCli {
    fn name(&self) -> &str {
        "dagger"
    }

    async fn call(
        &self,
        invocation: &PipelineInvocation,
        control: &RunControl,
    ) -> Result<ProcessOutput, BackendError> {
        let binary = self.binary.as_ref().ok_or_else(|| BackendError::NotInstalled {
            binary: "dagger".to_string(),
        })?;

        run_process(
            binary,
            &invocation.to_dagger_args(),
            Some(&invocation.working_dir),
            &control.cancel,
            control.timeout,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn test_missing_binary_reports_not_installed() {
        let engine = DaggerCli { binary: None };
        let control = RunControl {
            cancel: CancellationToken::new(),
            timeout: None,
        };
        let err = engine
            .call(&PipelineInvocation::default(), &control)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            BackendError::NotInstalled {
                binary: "dagger".into()
            }
        );
    }
}
