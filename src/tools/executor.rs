//! Tool Executor - maps a tool call to a side effect and a textual result
//!
//! The executor never fails: every error is rendered as the text of the
//! tool result so the model can read it and react.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};

use super::catalog::{KILL_PROCESS, LIST_PROCESSES, RUN_COMMAND};
use super::shell::run_foreground;
use crate::metrics::TOOL_CALLS;
use crate::process::{ProcessRecord, ProcessSupervisor, SupervisorError};

/// Error type for a single tool invocation
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("invalid arguments: {0}")]
    InvalidArguments(#[from] serde_json::Error),
    #[error("missing or invalid argument '{0}'")]
    MissingArgument(&'static str),
    #[error("command must not be empty")]
    EmptyCommand,
    #[error("invalid PID")]
    InvalidPid,
    #[error("unknown tool call '{0}'")]
    UnknownTool(String),
    #[error("failed to run command: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("command timed out after {}s", .0.as_secs())]
    Timeout(Duration),
    #[error(transparent)]
    Supervisor(#[from] SupervisorError),
}

/// Configuration for command execution
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Shell used for `shell -c <command>`
    pub shell: String,
    /// Limit for synchronous commands; the process group is killed when it expires
    pub command_timeout: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            shell: "bash".to_string(),
            command_timeout: Duration::from_secs(300),
        }
    }
}

/// Dispatches tool calls requested by the model
pub struct ToolExecutor {
    supervisor: Arc<ProcessSupervisor>,
    config: ExecutorConfig,
}

impl ToolExecutor {
    pub fn new(supervisor: Arc<ProcessSupervisor>, config: ExecutorConfig) -> Self {
        Self { supervisor, config }
    }

    pub fn supervisor(&self) -> &Arc<ProcessSupervisor> {
        &self.supervisor
    }

    /// Execute the tool `name` with the model-supplied JSON `arguments`
    ///
    /// Background processes are tagged with `conversation_id` so they can be
    /// killed together when the conversation is deleted.
    pub async fn execute(
        &self,
        name: &str,
        arguments: &str,
        conversation_id: Option<&str>,
    ) -> String {
        let result = self.dispatch(name, arguments, conversation_id).await;

        let label = match name {
            RUN_COMMAND | LIST_PROCESSES | KILL_PROCESS => name,
            _ => "unknown",
        };
        match result {
            Ok(output) => {
                TOOL_CALLS.with_label_values(&[label, "ok"]).inc();
                output
            }
            Err(e) => {
                TOOL_CALLS.with_label_values(&[label, "error"]).inc();
                warn!(tool = name, error = %e, "Tool call failed");
                format!("Error: {e}")
            }
        }
    }

    async fn dispatch(
        &self,
        name: &str,
        arguments: &str,
        conversation_id: Option<&str>,
    ) -> Result<String, ToolError> {
        match name {
            RUN_COMMAND => {
                let args = parse_arguments(arguments)?;
                let command = args
                    .get("command")
                    .and_then(Value::as_str)
                    .ok_or(ToolError::MissingArgument("command"))?;
                let background = match args.get("background") {
                    None | Some(Value::Null) => false,
                    Some(Value::Bool(b)) => *b,
                    Some(_) => return Err(ToolError::MissingArgument("background")),
                };
                if command.trim().is_empty() {
                    return Err(ToolError::EmptyCommand);
                }

                if background {
                    self.run_background(command, conversation_id).await
                } else {
                    self.run_command(command).await
                }
            }
            LIST_PROCESSES => Ok(format_process_list(&self.supervisor.list().await)),
            KILL_PROCESS => {
                let args = parse_arguments(arguments)?;
                let pid = parse_pid(args.get("pid"))?;
                self.supervisor.kill(pid).await?;
                Ok(format!("Successfully killed process {pid}"))
            }
            other => Err(ToolError::UnknownTool(other.to_string())),
        }
    }

    async fn run_command(&self, command: &str) -> Result<String, ToolError> {
        debug!(command, "Running command");
        let result = run_foreground(&self.config.shell, command, self.config.command_timeout).await?;
        if !result.status.success() {
            warn!(command, status = %result.status, "Command exited with nonzero status");
        }
        Ok(result.output)
    }

    async fn run_background(
        &self,
        command: &str,
        conversation_id: Option<&str>,
    ) -> Result<String, ToolError> {
        let record = self.supervisor.start(command, conversation_id).await?;
        Ok(format!(
            "Started background process with PID {}: {}",
            record.pid, record.command
        ))
    }
}

fn parse_arguments(arguments: &str) -> Result<Value, ToolError> {
    if arguments.trim().is_empty() {
        return Ok(Value::Object(Default::default()));
    }
    Ok(serde_json::from_str(arguments)?)
}

/// Accepts integers, integral floats and numeric strings
fn parse_pid(value: Option<&Value>) -> Result<u32, ToolError> {
    let pid = match value {
        Some(Value::Number(n)) => match (n.as_u64(), n.as_f64()) {
            (Some(v), _) => Some(v),
            (None, Some(f)) if f.fract() == 0.0 && f > 0.0 => Some(f as u64),
            _ => None,
        },
        Some(Value::String(s)) => s.trim().parse::<u64>().ok(),
        _ => None,
    };

    match pid {
        Some(pid) if pid > 0 && pid <= i32::MAX as u64 => Ok(pid as u32),
        _ => Err(ToolError::InvalidPid),
    }
}

fn format_process_list(records: &[ProcessRecord]) -> String {
    if records.is_empty() {
        return "No background processes running.".to_string();
    }

    let mut sorted: Vec<&ProcessRecord> = records.iter().collect();
    sorted.sort_by_key(|r| r.pid);

    let mut out = format!("Running background processes ({}):", sorted.len());
    for record in sorted {
        out.push_str(&format!(
            "\nPID: {} | Command: {} | Running for: {}",
            record.pid,
            record.command,
            format_elapsed(record.elapsed())
        ));
    }
    out
}

/// Format a duration like `1h2m3s`, omitting leading zero units
fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{h}h{m}m{s}s")
    } else if m > 0 {
        format!("{m}m{s}s")
    } else {
        format!("{s}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn executor() -> ToolExecutor {
        ToolExecutor::new(Arc::new(ProcessSupervisor::default()), ExecutorConfig::default())
    }

    #[tokio::test]
    async fn test_run_command_sync() {
        let out = executor()
            .execute(RUN_COMMAND, r#"{"command":"echo hello"}"#, None)
            .await;
        assert_eq!(out.trim(), "hello");
    }

    #[tokio::test]
    async fn test_run_command_nonzero_exit_returns_output() {
        let out = executor()
            .execute(RUN_COMMAND, r#"{"command":"echo oops >&2; exit 3"}"#, None)
            .await;
        assert_eq!(out.trim(), "oops");
    }

    #[tokio::test]
    async fn test_empty_command_rejected() {
        let exec = executor();
        let sync = exec.execute(RUN_COMMAND, r#"{"command":"   "}"#, None).await;
        let bg = exec
            .execute(RUN_COMMAND, r#"{"command":"","background":true}"#, None)
            .await;
        assert_eq!(sync, "Error: command must not be empty");
        assert_eq!(bg, "Error: command must not be empty");
        assert!(exec.supervisor().list().await.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_arguments() {
        let exec = executor();
        let out = exec.execute(RUN_COMMAND, "{not json", None).await;
        assert!(out.starts_with("Error: invalid arguments"));

        let out = exec.execute(RUN_COMMAND, r#"{"cmd":"ls"}"#, None).await;
        assert_eq!(out, "Error: missing or invalid argument 'command'");

        let out = exec
            .execute(RUN_COMMAND, r#"{"command":"ls","background":"yes"}"#, None)
            .await;
        assert_eq!(out, "Error: missing or invalid argument 'background'");
    }

    #[tokio::test]
    async fn test_background_start_and_kill() {
        let exec = executor();
        let out = exec
            .execute(RUN_COMMAND, r#"{"command":"sleep 30","background":true}"#, Some("c1"))
            .await;
        assert!(out.starts_with("Started background process with PID "));
        assert!(out.ends_with(": sleep 30"));

        let records = exec.supervisor().list().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].conversation_id.as_deref(), Some("c1"));

        let listing = exec.execute(LIST_PROCESSES, "", None).await;
        assert!(listing.starts_with("Running background processes (1):"));
        assert!(listing.contains(&format!("PID: {} | Command: sleep 30", records[0].pid)));

        let pid = records[0].pid;
        let out = exec
            .execute(KILL_PROCESS, &format!(r#"{{"pid":{pid}}}"#), None)
            .await;
        assert_eq!(out, format!("Successfully killed process {pid}"));
        assert!(exec.supervisor().list().await.is_empty());
    }

    #[tokio::test]
    async fn test_list_processes_empty() {
        let out = executor().execute(LIST_PROCESSES, "{}", None).await;
        assert_eq!(out, "No background processes running.");
    }

    #[tokio::test]
    async fn test_kill_unknown_pid_reports_not_found() {
        let out = executor()
            .execute(KILL_PROCESS, r#"{"pid":12345}"#, None)
            .await;
        assert_eq!(out, "Error: process 12345 not found");
    }

    #[tokio::test]
    async fn test_kill_invalid_pid() {
        let exec = executor();
        for args in [r#"{}"#, r#"{"pid":"abc"}"#, r#"{"pid":-1}"#, r#"{"pid":0}"#, r#"{"pid":1.5}"#] {
            assert_eq!(exec.execute(KILL_PROCESS, args, None).await, "Error: invalid PID");
        }
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let out = executor().execute("rm_rf", "{}", None).await;
        assert_eq!(out, "Error: unknown tool call 'rm_rf'");
    }

    #[test]
    fn test_parse_pid_accepts_numeric_forms() {
        assert_eq!(parse_pid(Some(&serde_json::json!(42))).unwrap(), 42);
        assert_eq!(parse_pid(Some(&serde_json::json!(42.0))).unwrap(), 42);
        assert_eq!(parse_pid(Some(&serde_json::json!(" 42 "))).unwrap(), 42);
        assert!(parse_pid(Some(&serde_json::json!(u64::MAX))).is_err());
    }

    #[test]
    fn test_format_elapsed() {
        assert_eq!(format_elapsed(Duration::from_secs(5)), "5s");
        assert_eq!(format_elapsed(Duration::from_secs(65)), "1m5s");
        assert_eq!(format_elapsed(Duration::from_secs(3723)), "1h2m3s");
    }

    #[test]
    fn test_format_process_list_sorted_by_pid() {
        let now = Utc::now();
        let records = vec![
            ProcessRecord { pid: 20, command: "b".into(), started_at: now, conversation_id: None },
            ProcessRecord { pid: 10, command: "a".into(), started_at: now, conversation_id: None },
        ];
        let text = format_process_list(&records);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "Running background processes (2):");
        assert!(lines[1].starts_with("PID: 10 | Command: a | Running for: "));
        assert!(lines[2].starts_with("PID: 20 | Command: b | Running for: "));
    }
}
