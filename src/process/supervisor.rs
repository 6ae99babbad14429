//! Process Supervisor - tracks background commands started by tool calls
//!
//! Each background command runs in its own process group so that anything it
//! spawns can be terminated together with a single signal to the group.
//!
//! ```text
//! start() ──► spawn `sh -c cmd` (pgid = pid) ──► register ProcessRecord
//!                    │
//!                    └──► exit watcher task: wait() ──► remove own record
//!
//! kill(pid) ──► SIGTERM to group ──(fails)──► SIGKILL to leader ──► remove record
//! ```
//!
//! Records are keyed by PID. Each record also carries a registration token so
//! that an exit watcher never removes a newer record whose process happens to
//! reuse the PID.

use std::collections::HashMap;
use std::os::unix::process::CommandExt;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use nix::errno::Errno;
use nix::sys::signal::{kill, killpg, Signal};
use nix::sys::wait::{waitid, Id, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::metrics::BACKGROUND_PROCESSES;

/// A background process owned by the supervisor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessRecord {
    /// OS process id (also the process group id)
    pub pid: u32,
    /// Command line as given to the shell
    pub command: String,
    pub started_at: DateTime<Utc>,
    /// Conversation whose tool call started the process
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
}

impl ProcessRecord {
    /// Time since the process was started
    pub fn elapsed(&self) -> std::time::Duration {
        (Utc::now() - self.started_at).to_std().unwrap_or_default()
    }
}

/// Error type for supervisor operations
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("failed to start process: {0}")]
    LaunchFailed(#[source] std::io::Error),
    #[error("process {0} not found")]
    NotFound(u32),
    #[error("failed to kill process {pid}: {source}")]
    KillFailed {
        pid: u32,
        #[source]
        source: Errno,
    },
}

struct Entry {
    record: ProcessRecord,
    token: u64,
}

type Registry = Arc<RwLock<HashMap<u32, Entry>>>;

/// Thread-safe registry of background processes
pub struct ProcessSupervisor {
    /// Shell used to interpret command lines (e.g., "bash")
    shell: String,
    registry: Registry,
    next_token: AtomicU64,
}

impl Default for ProcessSupervisor {
    fn default() -> Self {
        Self::new("bash")
    }
}

impl ProcessSupervisor {
    /// Create a supervisor that runs commands with `shell -c <command>`
    pub fn new(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
            registry: Arc::new(RwLock::new(HashMap::new())),
            next_token: AtomicU64::new(0),
        }
    }

    /// Launch `command` in its own process group and start tracking it
    ///
    /// Returns as soon as the process is running. A shell that starts but
    /// reports a nonzero status (e.g. command not found) is not a launch
    /// failure; the record simply disappears once the exit watcher sees it.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn start(
        &self,
        command: &str,
        conversation_id: Option<&str>,
    ) -> Result<ProcessRecord, SupervisorError> {
        let mut cmd = std::process::Command::new(&self.shell);
        cmd.arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .process_group(0);

        let mut child = tokio::process::Command::from(cmd)
            .spawn()
            .map_err(SupervisorError::LaunchFailed)?;

        let pid = child.id().ok_or_else(|| {
            SupervisorError::LaunchFailed(std::io::Error::new(
                std::io::ErrorKind::Other,
                "process exited before it could be registered",
            ))
        })?;

        let record = ProcessRecord {
            pid,
            command: command.to_string(),
            started_at: Utc::now(),
            conversation_id: conversation_id.map(str::to_string),
        };
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);

        {
            let mut registry = self.registry.write().await;
            registry.insert(
                pid,
                Entry {
                    record: record.clone(),
                    token,
                },
            );
            BACKGROUND_PROCESSES.set(registry.len() as f64);
        }

        // Exit watcher: owns the child, reaps it, and removes only its own record
        let registry = Arc::clone(&self.registry);
        let watched_command = record.command.clone();
        tokio::spawn(async move {
            let status = child.wait().await;
            {
                let mut registry = registry.write().await;
                if registry.get(&pid).map(|e| e.token) == Some(token) {
                    registry.remove(&pid);
                    BACKGROUND_PROCESSES.set(registry.len() as f64);
                }
            }
            match status {
                Ok(status) => {
                    info!(pid, status = %status, command = %watched_command, "Background process finished")
                }
                Err(e) => {
                    warn!(pid, error = %e, command = %watched_command, "Failed to wait for background process")
                }
            }
        });

        info!(pid, command, conversation_id = ?conversation_id, "Started background process");
        Ok(record)
    }

    /// List live background processes
    ///
    /// Each registered PID is probed; records for processes that no longer
    /// exist are evicted. Order is unspecified.
    pub async fn list(&self) -> Vec<ProcessRecord> {
        let mut alive = Vec::new();
        let mut dead = Vec::new();
        {
            let registry = self.registry.read().await;
            for (pid, entry) in registry.iter() {
                if is_alive(*pid) && !has_exited(*pid) {
                    alive.push(entry.record.clone());
                } else {
                    dead.push((*pid, entry.token));
                }
            }
        }

        if !dead.is_empty() {
            let mut registry = self.registry.write().await;
            for (pid, token) in dead {
                if registry.get(&pid).map(|e| e.token) == Some(token) {
                    registry.remove(&pid);
                    debug!(pid, "Evicted record for exited process");
                }
            }
            BACKGROUND_PROCESSES.set(registry.len() as f64);
        }

        alive
    }

    /// Terminate a background process and its whole process group
    ///
    /// Sends SIGTERM to the group; if that fails, sends SIGKILL to the named
    /// process alone. The record is removed immediately on success.
    pub async fn kill(&self, pid: u32) -> Result<(), SupervisorError> {
        let mut registry = self.registry.write().await;
        if !registry.contains_key(&pid) {
            return Err(SupervisorError::NotFound(pid));
        }
        if has_exited(pid) {
            // Zombie still waiting for its exit watcher; signalling it would succeed
            registry.remove(&pid);
            BACKGROUND_PROCESSES.set(registry.len() as f64);
            return Err(SupervisorError::NotFound(pid));
        }

        let target = Pid::from_raw(pid as i32);
        if let Err(group_err) = killpg(target, Signal::SIGTERM) {
            debug!(pid, error = %group_err, "Process group signal failed, killing process directly");
            match kill(target, Signal::SIGKILL) {
                Ok(()) => {}
                Err(Errno::ESRCH) => {
                    // Exited before the watcher got to it
                    registry.remove(&pid);
                    BACKGROUND_PROCESSES.set(registry.len() as f64);
                    return Err(SupervisorError::NotFound(pid));
                }
                Err(source) => return Err(SupervisorError::KillFailed { pid, source }),
            }
        }

        if let Some(entry) = registry.remove(&pid) {
            info!(pid, command = %entry.record.command, "Killed process (and its process group)");
        }
        BACKGROUND_PROCESSES.set(registry.len() as f64);
        Ok(())
    }

    /// Best-effort termination of every registered process group
    pub async fn kill_all(&self) -> usize {
        let entries: Vec<Entry> = {
            let mut registry = self.registry.write().await;
            let drained = registry.drain().map(|(_, entry)| entry).collect();
            BACKGROUND_PROCESSES.set(0.0);
            drained
        };

        let count = entries.len();
        for entry in entries {
            terminate_group(&entry.record);
        }
        count
    }

    /// Best-effort termination of every process started for `conversation_id`
    pub async fn kill_by_conversation(&self, conversation_id: &str) -> usize {
        let entries: Vec<Entry> = {
            let mut registry = self.registry.write().await;
            let pids: Vec<u32> = registry
                .iter()
                .filter(|(_, e)| e.record.conversation_id.as_deref() == Some(conversation_id))
                .map(|(pid, _)| *pid)
                .collect();
            let removed = pids.iter().filter_map(|pid| registry.remove(pid)).collect();
            BACKGROUND_PROCESSES.set(registry.len() as f64);
            removed
        };

        let count = entries.len();
        for entry in entries {
            terminate_group(&entry.record);
        }
        count
    }
}

/// Signal-0 liveness probe. EPERM means the process exists but belongs to someone else.
fn is_alive(pid: u32) -> bool {
    matches!(kill(Pid::from_raw(pid as i32), None), Ok(()) | Err(Errno::EPERM))
}

/// Whether our child `pid` has terminated, without reaping it
///
/// The exit watcher still owns the reap; `WNOWAIT` leaves the status for it.
/// ECHILD means it was already reaped.
fn has_exited(pid: u32) -> bool {
    let flags = WaitPidFlag::WEXITED | WaitPidFlag::WNOHANG | WaitPidFlag::WNOWAIT;
    match waitid(Id::Pid(Pid::from_raw(pid as i32)), flags) {
        Ok(WaitStatus::StillAlive) => false,
        Ok(_) | Err(Errno::ECHILD) => true,
        Err(_) => false,
    }
}

fn terminate_group(record: &ProcessRecord) {
    let target = Pid::from_raw(record.pid as i32);
    let _ = killpg(target, Signal::SIGTERM);
    let _ = kill(target, Signal::SIGKILL);
    info!(
        pid = record.pid,
        conversation_id = ?record.conversation_id,
        command = %record.command,
        "Killed process"
    );
}
