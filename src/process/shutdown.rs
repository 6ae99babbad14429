//! Signal handling: terminate every background process group on SIGINT/SIGTERM

use std::sync::{Arc, OnceLock};

use tokio::signal::unix::{signal, SignalKind};
use tracing::{info, warn};

use super::ProcessSupervisor;

static INSTALLED: OnceLock<()> = OnceLock::new();

/// Install the process-wide shutdown hook
///
/// On SIGINT or SIGTERM every registered process group is killed, the trace
/// exporter is flushed, and the process exits with status 0. Only the first
/// call installs a hook; later calls return `false` and do nothing.
///
/// Must be called from within a tokio runtime.
pub fn install_shutdown_hook(supervisor: Arc<ProcessSupervisor>) -> bool {
    if INSTALLED.set(()).is_err() {
        return false;
    }

    tokio::spawn(async move {
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => Some(s),
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler, listening for Ctrl+C only");
                None
            }
        };

        let received = tokio::select! {
            _ = tokio::signal::ctrl_c() => "SIGINT",
            _ = async {
                match sigterm.as_mut() {
                    Some(s) => { s.recv().await; }
                    None => std::future::pending::<()>().await,
                }
            } => "SIGTERM",
        };

        info!(signal = received, "Received shutdown signal, cleaning up background processes");
        let killed = supervisor.kill_all().await;
        info!(killed, "Background processes terminated");

        crate::telemetry::shutdown_tracing();
        std::process::exit(0);
    });

    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_hook_installs_once() {
        let supervisor = Arc::new(ProcessSupervisor::default());
        assert!(install_shutdown_hook(Arc::clone(&supervisor)));
        assert!(!install_shutdown_hook(Arc::clone(&supervisor)));
        assert!(!install_shutdown_hook(supervisor));
    }
}
