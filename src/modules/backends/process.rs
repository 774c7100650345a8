//! Child process execution with cancellation and timeout

use crate::modules::backends::ProcessOutput;
use crate::modules::error::BackendError;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Run `program args...` to completion, capturing its output
///
/// The child is killed if `cancel` fires or `timeout` elapses first.
pub async fn run_process(
    program: &Path,
    args: &[String],
    cwd: Option<&Path>,
    cancel: &CancellationToken,
    timeout: Option<Duration>,
) -> Result<ProcessOutput, BackendError> {
    let binary = program.display().to_string();

    if cancel.is_cancelled() {
        return Err(BackendError::Cancelled);
    }

    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = cwd {
        command.current_dir(dir);
    }

    debug!("Spawning {} {}", binary, args.join(" "));
    let child = command.spawn().map_err(|e| BackendError::Spawn {
        binary: binary.clone(),
        error: e.to_string(),
    })?;

    let deadline = async {
        match timeout {
            Some(after) => tokio::time::sleep(after).await,
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        output = child.wait_with_output() => {
            let output = output.map_err(|e| BackendError::Io {
                binary: binary.clone(),
                error: e.to_string(),
            })?;
            Ok(ProcessOutput {
                exit_code: output.status.code().unwrap_or(-1),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            })
        }
        _ = cancel.cancelled() => {
            warn!("Cancelled {}", binary);
            Err(BackendError::Cancelled)
        }
        _ = deadline => {
            let after = timeout.unwrap_or_default();
            warn!("{} timed out after {:?}", binary, after);
            Err(BackendError::TimedOut { after })
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::Instant;

    fn sh() -> PathBuf {
        PathBuf::from("/bin/sh")
    }

    #[tokio::test]
    async fn test_captures_output_and_exit_code() {
        let output = run_process(
            &sh(),
            &["-c".into(), "echo out; echo err >&2; exit 3".into()],
            None,
            &CancellationToken::new(),
            None,
        )
        .await
        .unwrap();
        assert_eq!(output.exit_code, 3);
        assert_eq!(output.stdout.trim(), "out");
        assert_eq!(output.stderr.trim(), "err");
    }

    #[tokio::test]
    async fn test_timeout_kills_child() {
        let started = Instant::now();
        let err = run_process(
            &sh(),
            &["-c".into(), "sleep 30".into()],
            None,
            &CancellationToken::new(),
            Some(Duration::from_millis(100)),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, BackendError::TimedOut { .. }));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_already_cancelled_never_spawns() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = run_process(&PathBuf::from("/nonexistent/binary"), &[], None, &cancel, None)
            .await
            .unwrap_err();
        assert_eq!(err, BackendError::Cancelled);
    }
}
