//! Synchronous command execution
//!
//! The command runs in its own process group with stderr folded into stdout,
//! so the returned text interleaves both streams in the order they were
//! written. On timeout the whole group is killed.

use std::os::unix::process::CommandExt;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use tracing::warn;

use super::ToolError;

/// Output of a finished foreground command
#[derive(Debug)]
pub struct CommandOutput {
    pub output: String,
    pub status: ExitStatus,
}

/// Run `command` through `shell -c`, capturing combined stdout/stderr
pub async fn run_foreground(
    shell: &str,
    command: &str,
    timeout: Duration,
) -> Result<CommandOutput, ToolError> {
    let mut cmd = std::process::Command::new(shell);
    cmd.arg("-c")
        .arg(format!("exec 2>&1\n{command}"))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .process_group(0);

    let mut cmd = tokio::process::Command::from(cmd);
    cmd.kill_on_drop(true);

    let child = cmd.spawn().map_err(ToolError::Spawn)?;
    let pgid = child.id();

    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(result) => {
            let output = result.map_err(ToolError::Spawn)?;
            Ok(CommandOutput {
                output: String::from_utf8_lossy(&output.stdout).into_owned(),
                status: output.status,
            })
        }
        Err(_) => {
            // The dropped future killed the shell; take its descendants with it
            if let Some(pgid) = pgid {
                if let Err(e) = killpg(Pid::from_raw(pgid as i32), Signal::SIGKILL) {
                    warn!(pgid, error = %e, "Failed to kill timed-out process group");
                }
            }
            Err(ToolError::Timeout(timeout))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(10);

    #[tokio::test]
    async fn test_echo() {
        let out = run_foreground("bash", "echo hello", TIMEOUT).await.unwrap();
        assert_eq!(out.output.trim(), "hello");
        assert!(out.status.success());
    }

    #[tokio::test]
    async fn test_stderr_is_combined() {
        let out = run_foreground("bash", "echo out; echo err >&2", TIMEOUT)
            .await
            .unwrap();
        assert!(out.output.contains("out"));
        assert!(out.output.contains("err"));
    }

    #[tokio::test]
    async fn test_nonzero_exit_keeps_output() {
        let out = run_foreground("bash", "echo partial; exit 42", TIMEOUT)
            .await
            .unwrap();
        assert_eq!(out.output.trim(), "partial");
        assert_eq!(out.status.code(), Some(42));
    }

    #[tokio::test]
    async fn test_timeout() {
        let result = run_foreground("bash", "sleep 10", Duration::from_millis(200)).await;
        assert!(matches!(result, Err(ToolError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_missing_shell_is_spawn_error() {
        let result = run_foreground("/nonexistent/shell", "true", TIMEOUT).await;
        assert!(matches!(result, Err(ToolError::Spawn(_))));
    }
}
