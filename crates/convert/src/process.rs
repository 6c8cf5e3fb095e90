use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::process::Command;

/// Lines of engine stderr kept in the log when a run fails.
const STDERR_TAIL: usize = 10;

/// Runs an engine to completion, killing it if it outlives `timeout` or if
/// the calling task is dropped.
pub(crate) async fn run(mut command: Command, timeout: Duration) -> Result<Output> {
    let program = command.as_std().get_program().to_string_lossy().into_owned();
    command.stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped()).kill_on_drop(true);
    tracing::trace!(%program, args = ?command.as_std().get_args().collect::<Vec<_>>(), "Spawning engine");
    let output = match tokio::time::timeout(timeout, command.output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
            exn::bail!(ErrorKind::ToolNotFound(program))
        },
        Ok(Err(e)) => return Err(e).or_raise(|| ErrorKind::Io),
        Err(_) => {
            tracing::warn!(%program, timeout = ?timeout, "Engine timed out and was killed");
            exn::bail!(ErrorKind::ToolTimeout);
        },
    };
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let lines: Vec<&str> = stderr.lines().collect();
        let tail = lines[lines.len().saturating_sub(STDERR_TAIL)..].join("\n");
        tracing::debug!(%program, status = %output.status, stderr = %tail, "Engine failed");
        exn::bail!(ErrorKind::ToolFailed(output.status.code().unwrap_or(-1)));
    }
    Ok(output)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_success() {
        let mut command = Command::new("sh");
        command.args(["-c", "echo hello"]);
        let output = run(command, Duration::from_secs(5)).await.unwrap();
        assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "hello");
    }

    #[tokio::test]
    async fn test_exit_code() {
        let mut command = Command::new("sh");
        command.args(["-c", "echo oops >&2; exit 3"]);
        let err = run(command, Duration::from_secs(5)).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::ToolFailed(3)));
    }

    #[tokio::test]
    async fn test_timeout() {
        let mut command = Command::new("sh");
        command.args(["-c", "sleep 5"]);
        let err = run(command, Duration::from_millis(50)).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::ToolTimeout));
    }

    #[tokio::test]
    async fn test_missing_program() {
        let err = run(Command::new("/nonexistent/engine"), Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::ToolNotFound(_)));
    }
}
