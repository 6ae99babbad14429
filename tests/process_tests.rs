//! Integration tests for the background process supervisor
//!
//! These start real `sleep` processes and verify registration, listing,
//! group termination and cleanup.

use std::collections::HashSet;
use std::time::Duration;

use nix::sys::signal::kill;
use nix::unistd::Pid;

use shellagent::{ProcessSupervisor, SupervisorError};

/// Exited, or a zombie waiting for a reaper outside our control
fn is_gone(pid: u32) -> bool {
    if kill(Pid::from_raw(pid as i32), None).is_err() {
        return true;
    }
    std::fs::read_to_string(format!("/proc/{pid}/stat"))
        .map(|stat| stat.rsplit_once(')').map_or(false, |(_, rest)| rest.trim_start().starts_with('Z')))
        .unwrap_or(true)
}

async fn wait_until_gone(pid: u32) -> bool {
    for _ in 0..100 {
        if is_gone(pid) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

/// Test that N starts yield N distinct records and killing one leaves N-1
#[tokio::test]
async fn test_distinct_registrations_and_single_kill() {
    let supervisor = ProcessSupervisor::default();

    let mut pids = Vec::new();
    for _ in 0..4 {
        pids.push(supervisor.start("sleep 30", None).await.unwrap().pid);
    }
    let unique: HashSet<u32> = pids.iter().copied().collect();
    assert_eq!(unique.len(), 4);

    let listed: HashSet<u32> = supervisor.list().await.iter().map(|r| r.pid).collect();
    assert_eq!(listed, unique);

    supervisor.kill(pids[0]).await.unwrap();
    let listed: HashSet<u32> = supervisor.list().await.iter().map(|r| r.pid).collect();
    assert_eq!(listed.len(), 3);
    assert!(!listed.contains(&pids[0]));

    assert!(wait_until_gone(pids[0]).await);
    supervisor.kill_all().await;
}

/// Test that killing twice reports NotFound the second time
#[tokio::test]
async fn test_kill_is_not_silently_repeated() {
    let supervisor = ProcessSupervisor::default();
    let pid = supervisor.start("sleep 30", None).await.unwrap().pid;

    supervisor.kill(pid).await.unwrap();
    assert!(matches!(
        supervisor.kill(pid).await,
        Err(SupervisorError::NotFound(p)) if p == pid
    ));
}

/// Test that a process that exits on its own is no longer listed or killable
#[tokio::test]
async fn test_exited_process_is_forgotten() {
    let supervisor = ProcessSupervisor::default();
    let pid = supervisor.start("sleep 0.1", None).await.unwrap().pid;

    assert!(wait_until_gone(pid).await);
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(supervisor.list().await.iter().all(|r| r.pid != pid));
    assert!(matches!(
        supervisor.kill(pid).await,
        Err(SupervisorError::NotFound(_))
    ));
}

/// Test that an exited process is NotFound even before its exit watcher runs
#[tokio::test]
async fn test_kill_of_unreaped_exit_is_not_found() {
    let supervisor = ProcessSupervisor::default();
    let pid = supervisor.start("exit 0", None).await.unwrap().pid;

    // Blocks the only runtime thread, so the exit watcher cannot reap it yet
    std::thread::sleep(Duration::from_millis(300));

    assert!(matches!(
        supervisor.kill(pid).await,
        Err(SupervisorError::NotFound(p)) if p == pid
    ));
    assert!(supervisor.list().await.iter().all(|r| r.pid != pid));
}

/// Test that killing the group also terminates children the command spawned
#[tokio::test]
async fn test_kill_terminates_descendants() {
    let dir = tempfile::tempdir().unwrap();
    let pid_file = dir.path().join("child.pid");

    let supervisor = ProcessSupervisor::default();
    let command = format!("sleep 30 & echo $! > {}; wait", pid_file.display());
    let leader = supervisor.start(&command, None).await.unwrap().pid;

    let mut child_pid = None;
    for _ in 0..100 {
        if let Ok(text) = std::fs::read_to_string(&pid_file) {
            if let Ok(pid) = text.trim().parse::<u32>() {
                child_pid = Some(pid);
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let child_pid = child_pid.expect("child pid was written");

    supervisor.kill(leader).await.unwrap();

    assert!(wait_until_gone(leader).await);
    assert!(wait_until_gone(child_pid).await);
}

/// Test that kill_by_conversation only touches that conversation's processes
#[tokio::test]
async fn test_kill_by_conversation() {
    let supervisor = ProcessSupervisor::default();
    let a1 = supervisor.start("sleep 30", Some("a")).await.unwrap().pid;
    let a2 = supervisor.start("sleep 30", Some("a")).await.unwrap().pid;
    let b = supervisor.start("sleep 30", Some("b")).await.unwrap().pid;
    let none = supervisor.start("sleep 30", None).await.unwrap().pid;

    assert_eq!(supervisor.kill_by_conversation("a").await, 2);
    assert_eq!(supervisor.kill_by_conversation("missing").await, 0);

    let listed: HashSet<u32> = supervisor.list().await.iter().map(|r| r.pid).collect();
    assert_eq!(listed, HashSet::from([b, none]));
    assert!(wait_until_gone(a1).await);
    assert!(wait_until_gone(a2).await);

    assert_eq!(supervisor.kill_all().await, 2);
    assert!(supervisor.list().await.is_empty());
    assert!(wait_until_gone(b).await);
    assert!(wait_until_gone(none).await);
}

/// Test that concurrent starts and lists are safe
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_start_and_list() {
    let supervisor = std::sync::Arc::new(ProcessSupervisor::default());

    let mut handles = Vec::new();
    for _ in 0..8 {
        let supervisor = supervisor.clone();
        handles.push(tokio::spawn(async move {
            let record = supervisor.start("sleep 30", Some("load")).await.unwrap();
            let _ = supervisor.list().await;
            record.pid
        }));
    }

    let mut pids = HashSet::new();
    for handle in handles {
        pids.insert(handle.await.unwrap());
    }
    assert_eq!(pids.len(), 8);
    assert_eq!(supervisor.list().await.len(), 8);
    assert_eq!(supervisor.kill_by_conversation("load").await, 8);
}
